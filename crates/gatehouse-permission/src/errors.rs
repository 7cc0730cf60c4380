use gatehouse_adapter::AdapterError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PermissionError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Casbin(#[from] casbin::Error),
    #[error(transparent)]
    Config(#[from] anyhow::Error),
}

pub type PermissionResult<T> = Result<T, PermissionError>;
