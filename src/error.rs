use thiserror::Error;

/// A single line/column position in PromQL source, used for syntax diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: u32,
    pub col: u32,
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// The error kinds the core distinguishes, per the error handling design.
///
/// Propagation policy: pushdown failures and `label_replace` regex failures
/// are recovered internally and never surface as this type. Everything else
/// is returned, not thrown, past a call boundary.
#[derive(Debug, Error)]
pub enum Error {
    #[error("syntax error at {pos}: {message}")]
    Syntax { pos: Position, message: String },

    #[error("semantic error: {0}")]
    Semantic(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("resource exhausted: {0}")]
    Resource(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn syntax(pos: Position, message: impl Into<String>) -> Self {
        Error::Syntax { pos, message: message.into() }
    }

    pub fn semantic(message: impl Into<String>) -> Self {
        Error::Semantic(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Error::Storage(message.into())
    }

    pub fn resource(message: impl Into<String>) -> Self {
        Error::Resource(message.into())
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Error::Timeout(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
