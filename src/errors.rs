use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum GroupsError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("General error: {0}")]
    General(String),
}

impl From<anyhow::Error> for GroupsError {
    fn from(err: anyhow::Error) -> Self {
        GroupsError::General(err.to_string())
    }
}

impl From<config::ConfigError> for GroupsError {
    fn from(err: config::ConfigError) -> Self {
        GroupsError::Config(err.to_string())
    }
}

impl From<toml::de::Error> for GroupsError {
    fn from(err: toml::de::Error) -> Self {
        GroupsError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GroupsError>;
