use std::time::Duration;

use genrelay_contracts::GenerationError;

use crate::llm::LanguageModel;
use crate::retry::{retry_with, RetryPolicy};

pub const ENHANCE_TIMEOUT: Duration = Duration::from_secs(10);
const ENHANCE_ATTEMPTS: usize = 3;

pub const DIFFUSION_PROMPT_INSTRUCTION: &str = "You rewrite short image ideas into detailed prompts for text-to-image diffusion models. \
Describe subject, setting, composition, lighting, style and camera or medium in one paragraph of comma-separated phrases. \
Do not add commentary. Reply with the finished prompt inside a single fenced code block.";

/// Contents of the first fenced code block, with any language tag dropped.
pub fn first_code_block(text: &str) -> Option<String> {
    let start = text.find("```")? + 3;
    let rest = &text[start..];
    let end = rest.find("```")?;
    let mut body = &rest[..end];
    if let Some((first_line, remainder)) = body.split_once('\n') {
        let tag = first_line.trim();
        if !tag.is_empty() && !tag.contains(' ') && tag.chars().all(|ch| ch.is_ascii_alphanumeric()) {
            body = remainder;
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_string())
}

/// Rewrites `prompt` with the model; any failure keeps the original.
pub fn enhance_prompt(model: &dyn LanguageModel, prompt: &str) -> String {
    let result = retry_with(
        RetryPolicy::immediate(ENHANCE_ATTEMPTS - 1),
        |_| {
            let reply = model.complete(DIFFUSION_PROMPT_INSTRUCTION, prompt, ENHANCE_TIMEOUT)?;
            first_code_block(&reply).ok_or_else(|| {
                GenerationError::Model("enhanced prompt not found in reply".to_string())
            })
        },
        |_| true,
        |attempt, err| tracing::debug!(attempt, error = %err, "prompt enhancement attempt failed"),
    );
    match result {
        Ok(enhanced) => enhanced,
        Err(exhausted) => {
            tracing::info!(error = %exhausted, "prompt enhancement failed; keeping original prompt");
            prompt.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use genrelay_contracts::history::Turn;

    use super::*;
    use crate::llm::{DryrunModel, ModelInput};
    use crate::stream::FragmentProducer;

    struct ChattyModel {
        calls: AtomicUsize,
    }

    impl LanguageModel for ChattyModel {
        fn name(&self) -> &str {
            "chatty"
        }

        fn stream_chat(
            &self,
            _history: &[Turn],
            _input: &ModelInput,
            _system_instruction: Option<&str>,
        ) -> Result<FragmentProducer, GenerationError> {
            Err(GenerationError::Model("not used".to_string()))
        }

        fn complete(
            &self,
            _system_instruction: &str,
            _prompt: &str,
            _timeout: Duration,
        ) -> Result<String, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("Sure! Here is a great prompt for you.".to_string())
        }
    }

    #[test]
    fn extracts_code_block_contents() {
        assert_eq!(
            first_code_block("Here:\n```\na misty forest, volumetric light\n```\nenjoy").as_deref(),
            Some("a misty forest, volumetric light")
        );
        assert_eq!(
            first_code_block("```text\nneon city\n```").as_deref(),
            Some("neon city")
        );
        assert_eq!(first_code_block("no block"), None);
        assert_eq!(first_code_block("``` ```"), None);
    }

    #[test]
    fn enhancement_uses_model_reply() {
        assert_eq!(
            enhance_prompt(&DryrunModel, "a cat"),
            "a cat, highly detailed"
        );
    }

    #[test]
    fn reply_without_block_falls_back_after_three_attempts() {
        let model = ChattyModel {
            calls: AtomicUsize::new(0),
        };
        assert_eq!(enhance_prompt(&model, "a cat"), "a cat");
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }
}
