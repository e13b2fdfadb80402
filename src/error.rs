use thiserror::Error;

/// Library error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("GDB error: {0}")]
    Gdb(String),

    #[error("Failed to spawn debugger: {0}")]
    Spawn(std::io::Error),

    #[error("Terminal error: {0}")]
    Pty(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Parse Json error: {0}")]
    ParseJson(#[from] serde_json::error::Error),
}

/// Library result type
pub type AppResult<T> = Result<T, AppError>;
