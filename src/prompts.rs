//! Centralized prompt definitions for the research pipeline
//!
//! This module contains all system prompts sent to the language-model
//! collaborator. Centralizing prompts makes them easier to maintain and test.

/// System prompt for the final report synthesis call.
///
/// The instruction contract: every factual claim must be traceable to a
/// numbered evidence block, and missing evidence must be stated rather than
/// papered over with invented figures.
pub const SYNTHESIS_SYSTEM_PROMPT: &str = r#"You are a senior equity research analyst. Write an investment research report that answers the user's request using ONLY the numbered evidence blocks provided.

Rules:
- Every factual claim and every figure MUST come from one of the evidence blocks. Reference the block inline as [n].
- If the evidence is insufficient to answer part of the request, say so explicitly. NEVER invent prices, ratios, or dates.
- Note the age of the data when it matters (e.g. stale fundamentals).
- Structure the report with short markdown sections and finish with a one-line disclaimer that this is information, not investment advice.
- Answer in the language of the user's request."#;

/// Terser synthesis contract for quick-analysis depth.
pub const QUICK_SYNTHESIS_SYSTEM_PROMPT: &str = r#"You are an equity analyst. Give a short, direct answer to the user's request using ONLY the numbered evidence blocks provided. Reference blocks inline as [n]. If the evidence does not cover something, say so - never invent figures. Answer in the language of the user's request."#;

/// System prompt for planning web search query variants for an intent.
pub const QUERY_PLAN_SYSTEM_PROMPT: &str = r#"You are an investment researcher. Given a research topic, produce the web search queries needed to gather the missing information.

Output exactly one query per line, nothing else. At most 3 lines."#;

/// System prompt for compressing a fetched page into a research note.
pub const SUMMARIZE_SYSTEM_PROMPT: &str = r#"Extract the facts, figures, and opinions relevant to the given topic from the page text that follows. Write a short plain-text note. Keep concrete numbers and dates. If the page contains nothing relevant, reply with the single word: IRRELEVANT."#;

/// Canned reply streamed when a request carries no financial intent at all.
pub const OUT_OF_DOMAIN_REPLY: &str = "This assistant answers research questions about equities: individual \
instruments, sectors, comparisons, and macro context. The request does not \
appear to contain a financial research question, so no retrieval was run. \
Please rephrase with a ticker, company name, or market topic.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthesis_prompt_carries_grounding_contract() {
        assert!(SYNTHESIS_SYSTEM_PROMPT.contains("evidence blocks"));
        assert!(SYNTHESIS_SYSTEM_PROMPT.contains("NEVER invent"));
    }

    #[test]
    fn test_query_plan_prompt_bounds_output() {
        assert!(QUERY_PLAN_SYSTEM_PROMPT.contains("one query per line"));
        assert!(QUERY_PLAN_SYSTEM_PROMPT.contains("3"));
    }

    #[test]
    fn test_summarize_prompt_has_irrelevant_marker() {
        assert!(SUMMARIZE_SYSTEM_PROMPT.contains("IRRELEVANT"));
    }
}
