use crate::config::ConfigError;
use switchyard_storage::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("mode controller has been shut down")]
    Disposed,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, ControllerError>;
