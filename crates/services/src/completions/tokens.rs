use inference_providers::{ChatMessage, TokenUsage};

/// Counts tokens for usage reporting when the upstream does not.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> i32;
}

/// Approximates tokens as whitespace-separated words.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceTokenEstimator;

impl TokenEstimator for WhitespaceTokenEstimator {
    fn estimate(&self, text: &str) -> i32 {
        i32::try_from(text.split_whitespace().count()).unwrap_or(i32::MAX)
    }
}

/// Prompt tokens over the concatenated prompt messages, completion tokens
/// over the assistant text.
pub fn estimate_usage(
    estimator: &dyn TokenEstimator,
    prompt: &[ChatMessage],
    completion: &str,
) -> TokenUsage {
    let prompt_text = prompt
        .iter()
        .map(ChatMessage::text_content)
        .collect::<Vec<_>>()
        .join(" ");
    TokenUsage::new(estimator.estimate(&prompt_text), estimator.estimate(completion))
}

#[cfg(test)]
mod tests {
    use super::*;
    use inference_providers::MessageRole;

    #[test]
    fn test_whitespace_estimate() {
        let estimator = WhitespaceTokenEstimator;
        assert_eq!(estimator.estimate(""), 0);
        assert_eq!(estimator.estimate("  hello \n\t world  "), 2);
    }

    #[test]
    fn test_estimate_usage_joins_messages() {
        let prompt = vec![
            ChatMessage::text(MessageRole::System, "be brief"),
            ChatMessage::text(MessageRole::User, "hello there"),
        ];
        let usage = estimate_usage(&WhitespaceTokenEstimator, &prompt, "hi");
        assert_eq!(usage.prompt_tokens, 4);
        assert_eq!(usage.completion_tokens, 1);
        assert_eq!(usage.total_tokens, 5);
    }
}
