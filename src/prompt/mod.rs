// src/prompt/mod.rs
// Deterministic system prompt assembly. Given the same inputs and instant,
// always produces byte-identical output.

use chrono::{DateTime, Utc};

use crate::search::SearchResponse;
use crate::session::types::HistoryEntry;

const BASE_IDENTITY: &str = "\
You are a helpful, knowledgeable assistant running on a local inference \
gateway. You answer directly and honestly, and you say when you don't know \
something rather than guessing.";

const TOOL_INSTRUCTIONS: &str = "\
### TOOLS
You have two tools available, triggered by emitting an exact tag on its own:
- `[SEARCH: <query>]` - search the web and read the top results before answering.
- `[EXPAND: <session_id>]` - pull the full transcript of a past session referenced below.
Use a tool only when the current context is insufficient to answer accurately.";

const SAFETY_PROTOCOL: &str = "\
### OPERATIONAL RULES
- Today's date is {current_date}.
- Do not fabricate sources, quotes, or statistics.
- Prefer information from verified memory and search results over assumption.";

#[derive(Debug, Clone)]
pub struct SummaryRef {
    pub session_id: String,
    pub title: String,
    pub summary: String,
}

#[derive(Debug, Clone)]
pub struct ExpandedTranscript {
    pub session_id: String,
    pub transcript: String,
}

#[derive(Default)]
pub struct PromptInputs<'a> {
    pub memories: &'a [String],
    pub history: &'a [HistoryEntry],
    pub related_summaries: &'a [SummaryRef],
    pub expanded_transcripts: &'a [ExpandedTranscript],
    pub search_context: Option<&'a str>,
    pub user_system_prompt: Option<&'a str>,
}

const HISTORY_WINDOW: usize = 16;

pub fn build_system_prompt(inputs: &PromptInputs, now: DateTime<Utc>) -> String {
    let mut sections = vec![
        BASE_IDENTITY.to_string(),
        TOOL_INSTRUCTIONS.to_string(),
        SAFETY_PROTOCOL.replace("{current_date}", &now.format("%A, %B %d, %Y").to_string()),
    ];

    if !inputs.memories.is_empty() {
        let block = inputs
            .memories
            .iter()
            .map(|m| format!("- {m}"))
            .collect::<Vec<_>>()
            .join("\n");
        sections.push(format!("### VERIFIED MEMORY\n{block}"));
    }

    if !inputs.history.is_empty() {
        let window_start = inputs.history.len().saturating_sub(HISTORY_WINDOW);
        let lines = inputs.history[window_start..]
            .iter()
            .map(|h| format!("{}: {}", h.role.to_uppercase(), h.content))
            .collect::<Vec<_>>()
            .join("\n");
        sections.push(format!("### RECENT DIALOGUE\n{lines}"));
    }

    if !inputs.related_summaries.is_empty() {
        let lines = inputs
            .related_summaries
            .iter()
            .map(|s| format!("- [{}] {}: {}", s.session_id, s.title, s.summary))
            .collect::<Vec<_>>()
            .join("\n");
        sections.push(format!(
            "### RELATED PAST SESSIONS\n{lines}\nUse [EXPAND: <session_id>] to read one in full before relying on it."
        ));
    }

    if !inputs.expanded_transcripts.is_empty() {
        for t in inputs.expanded_transcripts {
            sections.push(format!(
                "### EXPANDED SESSION {}\n{}",
                t.session_id, t.transcript
            ));
        }
    }

    if let Some(search_context) = inputs.search_context {
        sections.push(search_context.to_string());
    }

    sections.push(
        "### FINAL INSTRUCTION\nAnswer using the information provided above. If it's \
         insufficient, emit [SEARCH: <query>] instead of guessing."
            .to_string(),
    );

    if let Some(user_prompt) = inputs.user_system_prompt {
        sections.push(format!(
            "### ADDITIONAL SYSTEM CONTEXT\n{user_prompt}"
        ));
    }

    sections.join("\n\n").trim().to_string()
}

/// Renders search results (or a plain status string on failure) into the
/// `search_context` section consumed by `build_system_prompt`.
pub fn format_search_results(outcome: &Result<SearchResponse, String>, max_chars_per_result: usize) -> String {
    match outcome {
        Err(status) => format!("### SEARCH STATUS:\n{status}\n"),
        Ok(response) => {
            let mut out = format!("### DEEP SEARCH RESULTS FOR: '{}'\n\n", response.query);
            for (i, result) in response.results.iter().enumerate() {
                out.push_str(&format!("--- SOURCE [{}]: {} ---\n", i + 1, result.title));
                out.push_str(&format!("URL: {}\n", result.url));
                out.push_str("CONTENT:\n");
                match &result.content {
                    Some(content) => {
                        let mut preview = content.clone();
                        if preview.chars().count() > max_chars_per_result {
                            preview = preview.chars().take(max_chars_per_result).collect();
                            preview.push_str("\n[...remaining text truncated for brevity...]");
                        }
                        out.push_str(&preview);
                    }
                    None => {
                        out.push_str(&format!("(Snippet Only) {}", result.description));
                    }
                }
                out.push_str("\n\n");
            }
            out.push_str("INSTRUCTION: Answer the user's question using the source content above.");
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 31, 12, 0, 0).unwrap()
    }

    #[test]
    fn identical_inputs_produce_identical_prompts() {
        let inputs = PromptInputs::default();
        let a = build_system_prompt(&inputs, fixed_now());
        let b = build_system_prompt(&inputs, fixed_now());
        assert_eq!(a, b);
    }

    #[test]
    fn user_system_prompt_is_appended_last() {
        let inputs = PromptInputs {
            user_system_prompt: Some("Be extra concise."),
            ..Default::default()
        };
        let prompt = build_system_prompt(&inputs, fixed_now());
        assert!(prompt.trim_end().ends_with("Be extra concise."));
    }

    #[test]
    fn search_error_renders_as_status_block() {
        let outcome: Result<SearchResponse, String> = Err("[Error: quota reached]".to_string());
        let rendered = format_search_results(&outcome, 100);
        assert!(rendered.contains("SEARCH STATUS"));
        assert!(rendered.contains("quota reached"));
    }
}
