//! Production `DocumentStore` over the official MongoDB driver.

use async_trait::async_trait;
use bson::Document;
use futures::stream::TryStreamExt;
use mongodb::options::{ClientOptions, FindOneOptions};
use mongodb::Client;

use super::{DocumentStore, StoreError};

pub struct MongoStore {
    client: Client,
    db_name: String,
}

impl MongoStore {
    pub async fn connect(uri: &str, db_name: &str, pool_size: u32) -> Result<Self, StoreError> {
        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|e| StoreError::Transport(format!("invalid mongo uri: {e}")))?;
        options.max_pool_size = Some(pool_size);
        let client = Client::with_options(options)
            .map_err(|e| StoreError::Transport(format!("failed to create mongo client: {e}")))?;
        Ok(Self { client, db_name: db_name.to_string() })
    }

    fn collection(&self, name: &str) -> mongodb::Collection<Document> {
        self.client.database(&self.db_name).collection(name)
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> Result<Vec<Document>, StoreError> {
        let cursor = self
            .collection(collection)
            .aggregate(pipeline, None)
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        cursor
            .try_collect()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))
    }

    async fn count(&self, collection: &str, filter: Document) -> Result<i64, StoreError> {
        self.collection(collection)
            .count_documents(filter, None)
            .await
            .map(|c| c as i64)
            .map_err(|e| StoreError::Transport(e.to_string()))
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
        projection: Option<Document>,
    ) -> Result<Option<Document>, StoreError> {
        let options = projection.map(|p| FindOneOptions::builder().projection(p).build());
        self.collection(collection)
            .find_one(filter, options)
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<(), StoreError> {
        let options = mongodb::options::UpdateOptions::builder().upsert(upsert).build();
        self.collection(collection)
            .update_one(filter, update, options)
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok(())
    }
}
