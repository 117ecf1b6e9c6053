//! Execution context handed to every tool, plus the question-handler and
//! child-session contracts.
//!
//! The context is plain data and callables: no back-references to the
//! session that built it, so tool code cannot create parent/child cycles.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::permission::AgentType;
use crate::session::Session;

// ─────────────────────────────────────────────────────────────────────────────
// Question Handler
// ─────────────────────────────────────────────────────────────────────────────

/// A batch of questions for the user.
#[derive(Debug, Clone)]
pub struct QuestionInfo {
    /// Questions, in order.
    pub questions: Vec<String>,
}

impl QuestionInfo {
    /// Create a single-question info.
    pub fn single(question: impl Into<String>) -> Self {
        Self {
            questions: vec![question.into()],
        }
    }
}

/// The user's answers.
#[derive(Debug, Clone)]
pub struct QuestionResponse {
    /// One answer per question.
    pub answers: Vec<String>,
    /// Whether the user dismissed the prompt. Treated as refusal.
    pub cancelled: bool,
}

impl QuestionResponse {
    /// A cancelled response.
    pub fn cancelled() -> Self {
        Self {
            answers: Vec::new(),
            cancelled: true,
        }
    }

    /// Answers without cancellation.
    pub fn answers(answers: Vec<String>) -> Self {
        Self {
            answers,
            cancelled: false,
        }
    }
}

/// Contract for resolving `Ask` permission outcomes and the question tool.
#[async_trait]
pub trait QuestionHandler: Send + Sync {
    /// Put the questions to the user and await their answers.
    async fn ask(&self, info: QuestionInfo) -> QuestionResponse;
}

/// A question handler shared across sessions.
pub type SharedQuestionHandler = Arc<dyn QuestionHandler>;

// ─────────────────────────────────────────────────────────────────────────────
// Child Sessions
// ─────────────────────────────────────────────────────────────────────────────

/// Callable that spawns an independent child session of the given agent
/// type. Installed by the embedder; `None` when sub-agents are disabled.
pub type ChildSessionFn = dyn Fn(AgentType) -> Option<Arc<Session>> + Send + Sync;

// ─────────────────────────────────────────────────────────────────────────────
// Tool Context
// ─────────────────────────────────────────────────────────────────────────────

/// Context provided to tools during execution.
#[derive(Clone)]
pub struct ToolContext {
    /// Id of the session dispatching the call.
    pub session_id: String,
    /// Id of the assistant message that requested the call.
    pub message_id: String,
    /// Absolute working directory for filesystem-flavored tools.
    pub working_dir: PathBuf,
    /// Cooperative cancellation shared with the session.
    pub abort: CancellationToken,
    /// Handler for user-facing questions, when one is installed.
    pub question_handler: Option<SharedQuestionHandler>,
    /// Hook for spawning sub-agent sessions, when installed.
    pub create_child_session: Option<Arc<ChildSessionFn>>,
}

impl ToolContext {
    /// Create a minimal context.
    pub fn new(session_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            message_id: message_id.into(),
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
            abort: CancellationToken::new(),
            question_handler: None,
            create_child_session: None,
        }
    }

    /// Set the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Share a cancellation token.
    pub fn with_abort(mut self, token: CancellationToken) -> Self {
        self.abort = token;
        self
    }

    /// Install a question handler.
    pub fn with_question_handler(mut self, handler: SharedQuestionHandler) -> Self {
        self.question_handler = Some(handler);
        self
    }

    /// Install a child-session factory.
    pub fn with_child_factory(mut self, factory: Arc<ChildSessionFn>) -> Self {
        self.create_child_session = Some(factory);
        self
    }

    /// Check whether execution has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.abort.is_cancelled()
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("session_id", &self.session_id)
            .field("message_id", &self.message_id)
            .field("working_dir", &self.working_dir)
            .field("has_question_handler", &self.question_handler.is_some())
            .field(
                "has_child_factory",
                &self.create_child_session.is_some(),
            )
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    struct YesHandler;

    #[async_trait]
    impl QuestionHandler for YesHandler {
        async fn ask(&self, info: QuestionInfo) -> QuestionResponse {
            QuestionResponse::answers(vec!["yes".to_string(); info.questions.len()])
        }
    }

    #[test]
    fn test_context_cancellation() {
        let token = CancellationToken::new();
        let ctx = ToolContext::new("s1", "m1").with_abort(token.clone());

        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_question_handler_contract() {
        let handler: SharedQuestionHandler = Arc::new(YesHandler);
        let response = handler
            .ask(QuestionInfo::single("Allow the agent to run 'bash'?"))
            .await;

        assert!(!response.cancelled);
        assert_eq!(response.answers, vec!["yes"]);
    }

    #[test]
    fn test_cancelled_response() {
        let response = QuestionResponse::cancelled();
        assert!(response.cancelled);
        assert!(response.answers.is_empty());
    }
}
