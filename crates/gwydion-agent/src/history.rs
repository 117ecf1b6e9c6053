//! History maintenance: token estimation, pruning, and output truncation.
//!
//! Pruning bounds input context by replacing the payload of *old*
//! tool-result blocks with a short placeholder; results from the skill
//! tool are exempt because an activated skill's instructions must persist
//! for the whole session. Pruning rewrites content in place and never adds
//! or removes blocks, so the tool-turn pairing invariant is untouched.

use gwydion_llm::{ContentBlock, Message};

/// Placeholder written over pruned tool-result payloads.
pub const PRUNED_PLACEHOLDER: &str = "[output pruned]";

/// Marker appended to truncated tool output.
pub const TRUNCATED_MARKER: &str = "\n[... output truncated]";

// ─────────────────────────────────────────────────────────────────────────────
// Token Estimation
// ─────────────────────────────────────────────────────────────────────────────

/// Rough token count: ~4 characters per token.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

/// Estimate tokens for one message, including structural overhead.
pub fn estimate_message_tokens(message: &Message) -> usize {
    let mut tokens = 10;
    for block in &message.content {
        tokens += match block {
            ContentBlock::Text { text } => estimate_tokens(text),
            ContentBlock::ToolUse { name, input, .. } => {
                estimate_tokens(name) + estimate_tokens(&input.to_string())
            }
            ContentBlock::ToolResult { content, .. } => estimate_tokens(content),
        };
    }
    tokens
}

/// Estimate tokens for a whole history.
pub fn estimate_history_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

// ─────────────────────────────────────────────────────────────────────────────
// Pruning
// ─────────────────────────────────────────────────────────────────────────────

/// Replace old tool-result payloads with [`PRUNED_PLACEHOLDER`].
///
/// A "result turn" is a message carrying at least one tool-result block.
/// The last `keep_recent_turns` result turns are left intact; older ones
/// are pruned, except results whose `tool_name` is `protected_tool`.
/// Returns the number of blocks pruned.
pub fn prune_old_outputs(
    messages: &mut [Message],
    keep_recent_turns: usize,
    protected_tool: &str,
) -> usize {
    let result_turns: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| {
            m.content
                .iter()
                .any(|b| matches!(b, ContentBlock::ToolResult { .. }))
        })
        .map(|(i, _)| i)
        .collect();

    if result_turns.len() <= keep_recent_turns {
        return 0;
    }

    let prune_until = result_turns.len() - keep_recent_turns;
    let mut pruned = 0;

    for &index in &result_turns[..prune_until] {
        for block in &mut messages[index].content {
            if let ContentBlock::ToolResult {
                tool_name, content, ..
            } = block
            {
                if tool_name == protected_tool || content == PRUNED_PLACEHOLDER {
                    continue;
                }
                *content = PRUNED_PLACEHOLDER.to_string();
                pruned += 1;
            }
        }
    }

    if pruned > 0 {
        tracing::debug!(pruned, "pruned old tool outputs");
    }
    pruned
}

// ─────────────────────────────────────────────────────────────────────────────
// Truncation
// ─────────────────────────────────────────────────────────────────────────────

/// Limits applied to tool output before it enters history.
#[derive(Debug, Clone, Copy)]
pub struct TruncateLimits {
    /// Maximum number of lines.
    pub max_lines: usize,
    /// Maximum number of bytes.
    pub max_bytes: usize,
}

impl Default for TruncateLimits {
    fn default() -> Self {
        Self {
            max_lines: 2000,
            max_bytes: 51_200,
        }
    }
}

/// Truncate `text` to the given limits, whichever bites first, appending
/// [`TRUNCATED_MARKER`] when anything was cut. Returns the (possibly
/// shortened) text and whether truncation happened.
pub fn truncate_output(text: &str, limits: TruncateLimits) -> (String, bool) {
    let mut out = text;

    // Line limit first.
    let mut line_truncated = false;
    if out.lines().count() > limits.max_lines {
        let end = out
            .lines()
            .take(limits.max_lines)
            .map(|l| l.len() + 1)
            .sum::<usize>()
            .min(out.len());
        out = &out[..end];
        line_truncated = true;
    }

    // Then the byte limit, kept on a char boundary.
    let mut byte_truncated = false;
    if out.len() > limits.max_bytes {
        let mut end = limits.max_bytes;
        while end > 0 && !out.is_char_boundary(end) {
            end -= 1;
        }
        out = &out[..end];
        byte_truncated = true;
    }

    if line_truncated || byte_truncated {
        let mut result = out.to_string();
        result.push_str(TRUNCATED_MARKER);
        (result, true)
    } else {
        (out.to_string(), false)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use gwydion_llm::Message;

    fn result_turn(id: &str, tool: &str, content: &str) -> Message {
        Message::tool_results(vec![ContentBlock::tool_result(id, tool, content)])
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
    }

    #[test]
    fn test_estimate_history_counts_all_block_kinds() {
        let mut assistant = Message::assistant("let me read");
        assistant.push_tool_use("c1", "read", serde_json::json!({"path": "/x"}));
        let history = vec![
            Message::user("read /x"),
            assistant,
            result_turn("c1", "read", "0123456789abcdef"),
        ];

        assert!(estimate_history_tokens(&history) > 30);
    }

    #[test]
    fn test_prune_keeps_recent_turns() {
        let mut messages = vec![
            Message::user("q1"),
            result_turn("c1", "read", "old output one"),
            result_turn("c2", "read", "old output two"),
            result_turn("c3", "read", "fresh output"),
        ];

        let pruned = prune_old_outputs(&mut messages, 1, "skill");
        assert_eq!(pruned, 2);

        let contents: Vec<&str> = messages
            .iter()
            .flat_map(|m| &m.content)
            .filter_map(|b| match b {
                ContentBlock::ToolResult { content, .. } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(
            contents,
            vec![PRUNED_PLACEHOLDER, PRUNED_PLACEHOLDER, "fresh output"]
        );
    }

    #[test]
    fn test_prune_never_touches_skill_results() {
        let mut messages = vec![
            result_turn("c1", "skill", "# Skill: review\nimportant instructions"),
            result_turn("c2", "read", "old file body"),
            result_turn("c3", "read", "newer file body"),
        ];

        prune_old_outputs(&mut messages, 1, "skill");

        match &messages[0].content[0] {
            ContentBlock::ToolResult { content, .. } => {
                assert!(content.contains("important instructions"));
            }
            _ => panic!("expected ToolResult"),
        }
        match &messages[1].content[0] {
            ContentBlock::ToolResult { content, .. } => {
                assert_eq!(content, PRUNED_PLACEHOLDER);
            }
            _ => panic!("expected ToolResult"),
        }
    }

    #[test]
    fn test_prune_preserves_block_structure() {
        let mut messages = vec![
            result_turn("c1", "read", "old"),
            result_turn("c2", "read", "new"),
        ];
        let blocks_before: usize = messages.iter().map(|m| m.content.len()).sum();

        prune_old_outputs(&mut messages, 1, "skill");

        let blocks_after: usize = messages.iter().map(|m| m.content.len()).sum();
        assert_eq!(blocks_before, blocks_after);
    }

    #[test]
    fn test_prune_noop_when_history_is_short() {
        let mut messages = vec![result_turn("c1", "read", "only output")];
        assert_eq!(prune_old_outputs(&mut messages, 2, "skill"), 0);
    }

    #[test]
    fn test_prune_is_idempotent() {
        let mut messages = vec![
            result_turn("c1", "read", "old"),
            result_turn("c2", "read", "new"),
        ];
        assert_eq!(prune_old_outputs(&mut messages, 1, "skill"), 1);
        assert_eq!(prune_old_outputs(&mut messages, 1, "skill"), 0);
    }

    #[test]
    fn test_truncate_by_lines() {
        let text = (0..10).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let (out, truncated) = truncate_output(
            &text,
            TruncateLimits {
                max_lines: 3,
                max_bytes: 51_200,
            },
        );

        assert!(truncated);
        assert!(out.contains("line 2"));
        assert!(!out.contains("line 3"));
        assert!(out.ends_with(TRUNCATED_MARKER));
    }

    #[test]
    fn test_truncate_by_bytes_respects_char_boundary() {
        let text = "é".repeat(100); // 2 bytes per char
        let (out, truncated) = truncate_output(
            &text,
            TruncateLimits {
                max_lines: 2000,
                max_bytes: 51,
            },
        );

        assert!(truncated);
        assert!(out.len() < 51 + TRUNCATED_MARKER.len() + 2);
        // Truncation fell back to the previous boundary.
        assert!(out.strip_suffix(TRUNCATED_MARKER).unwrap().chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_truncate_noop_under_limits() {
        let (out, truncated) = truncate_output("short", TruncateLimits::default());
        assert!(!truncated);
        assert_eq!(out, "short");
    }
}
