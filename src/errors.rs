//! Error taxonomy (§7). Each variant below is scoped to the level of the
//! system it can stop: suite-fatal errors abort before any test runs,
//! test-local errors are recorded against one `TestResult` and the suite
//! continues.

use thiserror::Error;

/// Malformed JSON, unknown field, or a field with the wrong shape.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("nfrules entry has no queue number")]
    MissingQueueNumber,

    #[error("queue number {qnum} is not even (output convention requires even numbers)")]
    QueueNumberNotEven { qnum: i64 },

    #[error("duplicate queue number {qnum} within the {direction} direction")]
    DuplicateQueueNumber { qnum: u16, direction: &'static str },

    #[error("command template is empty")]
    EmptyCommand,

    #[error("command template placeholder {placeholder} is malformed")]
    BadPlaceholder { placeholder: String },
}

/// A `mod_opts` value with the wrong shape or an argument that does not
/// parse.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgumentError {
    #[error("empty argument token list")]
    Empty,

    #[error("{kind} expects {expected} token(s), got {got}")]
    WrongArity {
        kind: &'static str,
        expected: &'static str,
        got: usize,
    },

    #[error("expected {expected}, got {got}")]
    TypeMismatch { expected: &'static str, got: String },

    #[error("'{token}' is not a valid integer")]
    NotAnInt { token: String },

    #[error("invalid range: {reason}")]
    InvalidRange { reason: String },

    #[error("modification '{name}' does not accept argument '{value}'")]
    InvalidValue { name: String, value: String },

    #[error("modification '{name}' requires {expected} argument(s), got {got}")]
    WrongArgumentCount {
        name: String,
        expected: &'static str,
        got: usize,
    },
}

/// A modification name that doesn't resolve in the registry.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown modification '{name}'")]
pub struct UnknownModification {
    pub name: String,
}

/// Rule install, queue open, or fork failure: fatal to the current test,
/// not to the suite.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to install diversion rule: {0}")]
    RuleInstall(String),

    #[error("failed to remove diversion rule: {0}")]
    RuleRemove(String),

    #[error("failed to open queue {qnum}: {source}")]
    QueueOpen { qnum: u16, source: std::io::Error },

    #[error("failed to spawn command: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Raised when `apply` fails on a modification that is not marked
/// `optional`; optional failures are logged and downgraded by the pipeline
/// instead of reaching this type.
#[derive(Debug, Error)]
#[error("modification '{modification}' failed: {reason}")]
pub struct ModificationRuntimeError {
    pub modification: String,
    pub reason: String,
}

/// The user command exited non-zero, or could not be reaped.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command exited with status {0}")]
    NonZeroExit(i32),

    #[error("command was terminated by a signal")]
    Signalled,

    #[error("failed to wait for command: {0}")]
    Wait(#[from] std::io::Error),
}

/// An invariant of the system was violated; always a programming error.
#[derive(Debug, Error)]
#[error("internal error: {0}")]
pub struct InternalError(pub String);

/// Top-level error returned by suite-fatal operations: configuration
/// loading, expansion, and `checkconfig`.
#[derive(Debug, Error)]
pub enum SuiteError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    UnknownModification(#[from] UnknownModification),

    #[error(transparent)]
    Argument(#[from] ArgumentError),

    #[error(transparent)]
    Internal(#[from] InternalError),
}

/// Why a single test did not pass.
#[derive(Debug, Error)]
pub enum TestError {
    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error(transparent)]
    Runtime(#[from] ModificationRuntimeError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("test was cancelled")]
    Cancelled,
}
