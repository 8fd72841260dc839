use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serde_json error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("artifact error: {0}")]
    Artifact(String),

    #[error("unsupported artifact version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("training cancelled after {merges} merges")]
    Cancelled { merges: usize },
}

impl Error {
    /// True for failures that describe a broken or unreadable artifact rather than
    /// a bad configuration or an interrupted run.
    pub fn is_artifact_failure(&self) -> bool {
        matches!(
            self,
            Error::Artifact(_) | Error::UnsupportedVersion { .. } | Error::SerdeJson(_)
        )
    }
}

pub(crate) fn context<S: Into<String>>(msg: S) -> Error {
    Error::Artifact(msg.into())
}
