//! Keyword fallback lexicon — the resolver's last resort when the LLM is
//! unreachable or its reply fails validation.

/// Common role name -> substrings to look for (case-insensitive) in a
/// column name. Checked in order; the first role whose key appears in (or
/// contains) the caller's requested role name is used.
const LEXICON: &[(&str, &[&str])] = &[
    ("quantity", &["quantity", "qty", "amount", "units", "volume"]),
    ("target", &["target", "planned", "goal", "expected", "plan"]),
    ("actual", &["actual", "achieved", "produced", "output"]),
    ("date", &["date", "time", "timestamp", "day", "period"]),
    ("entity", &["name", "id", "entity", "code", "key"]),
    ("category", &["category", "type", "group", "class", "segment"]),
    ("revenue", &["revenue", "sales", "price", "cost", "value"]),
];

/// Finds the lexicon entry whose role key best matches `role`, returning
/// its keyword list, or `None` if no key relates to `role` at all.
fn patterns_for_role(role: &str) -> Option<&'static [&'static str]> {
    let role_lower = role.to_lowercase();
    LEXICON
        .iter()
        .find(|(key, _)| role_lower.contains(key) || key.contains(role_lower.as_str()))
        .map(|(_, patterns)| *patterns)
}

/// Picks the first column whose name contains (case-insensitively) any
/// keyword associated with `role`. Returns `None` when nothing matches —
/// the resolver never errors on fallback, it reports an unresolved role.
pub fn resolve_role(role: &str, columns: &[String]) -> Option<String> {
    let patterns = patterns_for_role(role)?;
    columns
        .iter()
        .find(|col| {
            let col_lower = col.to_lowercase();
            patterns.iter().any(|p| col_lower.contains(p))
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_quantity_role_to_qty_column() {
        let columns = vec!["Product".to_string(), "Actual_Qty".to_string(), "Target_Qty".to_string()];
        assert_eq!(resolve_role("actual_quantity", &columns), Some("Actual_Qty".to_string()));
    }

    #[test]
    fn unknown_role_resolves_to_none() {
        let columns = vec!["Product".to_string()];
        assert_eq!(resolve_role("nonsense_role_xyz", &columns), None);
    }

    #[test]
    fn date_role_matches_timestamp_column() {
        let columns = vec!["Order_Timestamp".to_string(), "Product".to_string()];
        assert_eq!(resolve_role("date", &columns), Some("Order_Timestamp".to_string()));
    }
}
