//! Parses one LLM completion into exactly one of `Action` / `Final Answer`.

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedStep {
    Action { thought: String, action: String, action_input: String },
    FinalAnswer { thought: String, answer: String },
}

/// Extracts the first `Thought:`/`Action:`/`Action Input:` triple or the
/// first `Final Answer:` block from a completion. Matching is
/// line-oriented and tolerant of the model repeating a label (only the
/// first occurrence of each counts); anything that matches neither shape
/// is unparseable.
pub fn parse_step(completion: &str) -> Option<ParsedStep> {
    let thought = extract_field(completion, "Thought:").unwrap_or_default();

    if let Some(answer) = extract_to_end(completion, "Final Answer:") {
        return Some(ParsedStep::FinalAnswer { thought, answer: answer.trim().to_string() });
    }

    let action = extract_field(completion, "Action:")?;
    let action_input = extract_field(completion, "Action Input:").unwrap_or_default();
    Some(ParsedStep::Action { thought, action, action_input })
}

/// Grabs the text following `label` up to the next recognized label or
/// end of string, trimmed.
fn extract_field(text: &str, label: &str) -> Option<String> {
    let start = text.find(label)? + label.len();
    let rest = &text[start..];
    let end = ["Thought:", "Action:", "Action Input:", "Observation:", "Final Answer:"]
        .iter()
        .filter_map(|l| rest.find(l))
        .min()
        .unwrap_or(rest.len());
    let value = rest[..end].trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Like `extract_field`, but takes everything to the end of the string —
/// used for `Final Answer`, which may itself contain any of the other
/// labels inside a fenced code block or prose.
fn extract_to_end(text: &str, label: &str) -> Option<String> {
    let start = text.find(label)? + label.len();
    Some(text[start..].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_action_step() {
        let completion = "Thought: I need the total.\nAction: agg_helper\nAction Input: f1|production|{}|[{\"op\":\"sum\",\"field\":\"Actual_Qty\",\"alias\":\"total\"}]";
        let step = parse_step(completion).unwrap();
        match step {
            ParsedStep::Action { thought, action, action_input } => {
                assert_eq!(thought, "I need the total.");
                assert_eq!(action, "agg_helper");
                assert!(action_input.contains("Actual_Qty"));
            },
            _ => panic!("expected Action step"),
        }
    }

    #[test]
    fn parses_final_answer_step() {
        let completion = "Thought: Done.\nFinal Answer: The total is 237525.";
        let step = parse_step(completion).unwrap();
        match step {
            ParsedStep::FinalAnswer { answer, .. } => assert_eq!(answer, "The total is 237525."),
            _ => panic!("expected FinalAnswer step"),
        }
    }

    #[test]
    fn final_answer_wins_even_if_action_label_present_in_prose() {
        let completion = "Thought: x\nFinal Answer: The plan involves an Action: that isn't real.";
        let step = parse_step(completion).unwrap();
        assert!(matches!(step, ParsedStep::FinalAnswer { .. }));
    }

    #[test]
    fn unparseable_completion_returns_none() {
        assert!(parse_step("I think the answer is probably something.").is_none());
    }

    #[test]
    fn action_without_action_input_defaults_to_empty() {
        let completion = "Thought: list files\nAction: list_user_files";
        let step = parse_step(completion).unwrap();
        match step {
            ParsedStep::Action { action_input, .. } => assert_eq!(action_input, ""),
            _ => panic!("expected Action step"),
        }
    }
}
