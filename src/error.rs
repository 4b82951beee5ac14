#[derive(Debug, thiserror::Error)]
pub enum TurboPadError {
    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Platform not supported: {0}")]
    PlatformNotSupported(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Macro format error: {0}")]
    MacroFormat(String),

    #[error("Command error: {0}")]
    Command(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TurboPadError>;
