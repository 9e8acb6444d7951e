//! Answer generation capability and the grounding prompt.

use async_trait::async_trait;

use crate::core::error::Result;

/// Phrase the model is told to use when the context lacks the answer.
pub const NOT_IN_CONTEXT_PHRASE: &str = "I couldn't find relevant information in your notes.";

/// Text-generation capability.
///
/// Failures (quota, auth, network) are reported as
/// [`Error::Generation`](crate::Error::Generation).
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;

    fn model_name(&self) -> &str;
}

/// Build the grounded prompt sent to the generator.
pub fn build_prompt(question: &str, context: &str) -> String {
    format!(
        "You answer questions about a user's personal knowledge base.\n\
         Answer ONLY from the context below, which contains excerpts of the user's notes.\n\
         If the answer is not in the context, say \"{NOT_IN_CONTEXT_PHRASE}\"\n\
         Cite the note each piece of information came from by its label, e.g. [Note 1: \"Title\"].\n\
         \n\
         CONTEXT FROM NOTES:\n\
         {context}\n\
         \n\
         QUESTION: {question}\n\
         \n\
         ANSWER:"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_contains_grounding_rules() {
        let prompt = build_prompt("What is the capital?", "[Note 1: \"A\"]\nParis");
        assert!(prompt.contains("ONLY from the context"));
        assert!(prompt.contains(NOT_IN_CONTEXT_PHRASE));
        assert!(prompt.contains("[Note 1: \"A\"]\nParis"));
        assert!(prompt.contains("QUESTION: What is the capital?"));
        assert!(prompt.ends_with("ANSWER:"));
    }
}
