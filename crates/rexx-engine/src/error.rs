//! Engine error types.

use rexx_remote::RemoteError;
use thiserror::Error;

/// Execution engine error.
///
/// The standard variables RC and ERRORTEXT are always written before one of
/// these propagates, so a script that inspects RC after a failed statement
/// observes a consistent failure signal even when the host lets the error
/// reach the top level.
#[derive(Debug, Error)]
pub enum EngineError {
    /// CALL named a routine that is neither a user subroutine, a registered
    /// built-in, nor an external script.
    #[error("subroutine not found: {name}")]
    SubroutineNotFound { name: String },

    /// A dynamic CALL gave its target through a variable that is not set.
    #[error("dynamic call target variable '{variable}' is not set")]
    UndefinedDynamicTarget { variable: String },

    /// A JSON heredoc had no content after trimming.
    #[error("heredoc <<{delimiter}>> declares JSON content but is empty")]
    EmptyHeredocJson { delimiter: String },

    /// A JSON heredoc's content is not wrapped in `{{}}` or `[]`.
    #[error("heredoc <<{delimiter}>> declares JSON content but is not JSON-shaped")]
    NotJsonShaped { delimiter: String },

    /// A JSON heredoc's content failed to parse.
    #[error("heredoc <<{delimiter}>> contains invalid JSON: {message}")]
    InvalidJson { delimiter: String, message: String },

    /// Remote endpoint dispatch failed (unreachable, 401, other HTTP error).
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// An ADDRESS handler or the RPC sender surfaced a failure.
    #[error("address target '{target}' failed: {message}")]
    HandlerFailure { target: String, message: String },

    /// An operation needed a collaborator that was never configured.
    #[error("no {0} collaborator configured")]
    MissingCollaborator(&'static str),

    /// Failure reported by an external collaborator (evaluator, executor,
    /// script runner).
    #[error("{0}")]
    Collaborator(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, EngineError>;
