use thiserror::Error;

use crate::client::ClientError;
use crate::store::StorageError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
