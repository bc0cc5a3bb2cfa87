//! Chart.js-spec extraction from a Final Answer — a fenced JSON block is
//! promoted to `chart_config` when it parses as a recognized chart shape;
//! any narration alongside it is discarded per the agent's own prompt
//! rule (§4.5: "the JSON wins").

use serde_json::Value as Json;

const CHART_TYPES: &[&str] =
    &["bar", "line", "pie", "doughnut", "scatter", "radar", "area"];

/// Returns `(chart_config, answer_detailed)`. When a valid chart spec is
/// found, `answer_detailed` is the text outside the fenced block (often
/// empty, since the prompt forbids narrating alongside a chart).
pub fn extract_chart(answer: &str) -> (Option<Json>, String) {
    match find_fenced_json_block(answer) {
        Some((_before, block, _after)) => match parse_chart_spec(&block) {
            // The JSON wins: any surrounding narration is discarded, not
            // merely deprioritized, per the agent's own prompt rule.
            Some(spec) => (Some(spec), String::new()),
            None => (None, answer.trim().to_string()),
        },
        None => (None, answer.trim().to_string()),
    }
}

fn find_fenced_json_block(text: &str) -> Option<(String, String, String)> {
    let start_fence = text.find("```")?;
    let after_open = start_fence + 3;
    let body_start = text[after_open..]
        .find('\n')
        .map(|i| after_open + i + 1)
        .unwrap_or(after_open);
    let end_fence = text[body_start..].find("```")? + body_start;
    let before = text[..start_fence].to_string();
    let block = text[body_start..end_fence].trim().to_string();
    let after = text[end_fence + 3..].to_string();
    Some((before, block, after))
}

fn parse_chart_spec(block: &str) -> Option<Json> {
    let value: Json = serde_json::from_str(block).ok()?;
    let obj = value.as_object()?;
    let chart_type = obj.get("type")?.as_str()?;
    if !CHART_TYPES.contains(&chart_type) {
        return None;
    }
    obj.get("data")?;
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_valid_line_chart() {
        let answer = "```json\n{\"type\":\"line\",\"data\":{\"labels\":[],\"datasets\":[]}}\n```";
        let (chart, detail) = extract_chart(answer);
        assert!(chart.is_some());
        assert_eq!(chart.unwrap()["type"], "line");
        assert!(detail.is_empty());
    }

    #[test]
    fn rejects_unknown_chart_type() {
        let answer = "```json\n{\"type\":\"not_a_chart\",\"data\":{}}\n```";
        let (chart, _) = extract_chart(answer);
        assert!(chart.is_none());
    }

    #[test]
    fn plain_prose_has_no_chart() {
        let (chart, detail) = extract_chart("The total is 237525.");
        assert!(chart.is_none());
        assert_eq!(detail, "The total is 237525.");
    }

    #[test]
    fn narration_alongside_chart_is_discarded_from_detail() {
        let answer = "Here you go:\n```json\n{\"type\":\"bar\",\"data\":{}}\n```\nHope that helps.";
        let (chart, detail) = extract_chart(answer);
        assert!(chart.is_some());
        assert!(detail.is_empty());
    }
}
