//! System preamble + scratchpad rendering for the ReAct loop.

use crate::services::tools::TOOLS;

use super::react::ScratchpadEntry;

const PREAMBLE: &str = "You are a data analyst assistant. Answer the user's question about \
their uploaded tabular data by reasoning step by step and calling tools to fetch and \
aggregate the data — never invent numbers.

Use this exact format for every turn:
Thought: <your reasoning>
Action: <tool name>
Action Input: <pipe-delimited arguments, exactly as shown in the tool's signature>

When you have enough information, instead write:
Thought: <your reasoning>
Final Answer: <answer>

The Final Answer is either plain user-visible text, or — only when the question explicitly \
asks for a chart, graph, plot, or trend visualization — a single fenced JSON code block \
containing a Chart.js-compatible spec (`type`, `data`, optional `options`) and nothing else. \
Never narrate the data next to a chart; the chart JSON stands alone.

Every numeric value you state in the Final Answer must be copied verbatim from a tool \
observation. Never round, recompute, or restate a number from memory.";

fn render_tool_list() -> String {
    let mut out = String::from("Available tools:\n");
    for tool in TOOLS {
        out.push_str(&format!("- {} : {}\n  example: {}\n", tool.name, tool.signature, tool.example));
    }
    out.push_str(
        "- resolve_columns : purpose|roles_json|file_id|table\n  \
        example: resolve_columns|extract the production line from a composite column|[\"line\"]|f1|production\n  \
        Use this when the question names a business concept (\"efficiency\", \"the line\") that \
        doesn't literally match a column name, or asks to derive a value from a composite column. \
        Never guess a column name outright — resolve it first.\n",
    );
    out
}

fn render_scratchpad(entries: &[ScratchpadEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&format!(
            "Thought: {}\nAction: {}\nAction Input: {}\nObservation: {}\n",
            entry.thought, entry.action, entry.action_input, entry.observation
        ));
    }
    out
}

/// Renders the full system prompt the orchestrator sends as `system` on
/// every iteration: preamble, tool list, transcript, and scratchpad so far.
pub fn render_system_prompt(transcript: &str, scratchpad: &[ScratchpadEntry]) -> String {
    format!(
        "{PREAMBLE}\n\n{}\nConversation so far:\n{transcript}\n\n{}",
        render_tool_list(),
        render_scratchpad(scratchpad)
    )
}
