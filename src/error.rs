use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Provider error: {0}")]
    Provider(#[from] crate::provider::ProviderError),

    #[error("Channel error: {0}")]
    Channel(#[from] crate::channel::ChannelError),

    #[error("Agent is already initialized")]
    AlreadyInitialized,

    #[error("Agent has been disposed")]
    Disposed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Missing or unusable configuration, including a missing API key.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Toml(_)
                | Error::Provider(crate::provider::ProviderError::MissingApiKey { .. })
        )
    }

    /// The provider's startup probe failed.
    pub fn is_provider_unavailable(&self) -> bool {
        matches!(
            self,
            Error::Provider(crate::provider::ProviderError::Unavailable { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
