use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] marketlens_core::ConfigError),

    #[error(transparent)]
    Validation(#[from] marketlens_core::ValidationError),

    #[error("no cached aggregate available; run 'marketlens live' first")]
    CacheMiss,

    #[error(
        "'marketlens {command}' needs a persistent cache but the {backend} backend is active; \
         set backend = \"redis\" under [cache]"
    )]
    PersistentCacheRequired {
        command: &'static str,
        backend: marketlens_core::CacheBackend,
    },

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) | Self::Validation(_) | Self::PersistentCacheRequired { .. } => 2,
            Self::CacheMiss => 3,
            Self::Serialization(_) => 4,
            Self::Io(_) => 10,
        }
    }
}

impl From<marketlens_core::CoreError> for CliError {
    fn from(error: marketlens_core::CoreError) -> Self {
        use marketlens_core::CoreError;

        match error {
            CoreError::Validation(error) => Self::Validation(error),
            CoreError::Config(error) => Self::Config(error),
            CoreError::Serialization(error) => Self::Serialization(error),
        }
    }
}
