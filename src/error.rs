#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Transport: {0}")]
    Transport(#[from] crate::transport::TransportError),
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("Keys: {0}")]
    Key(#[from] crate::keys::KeyError),
    #[error("Store: {0}")]
    Store(#[from] crate::store::StoreError),
    #[error("{0}")]
    Internal(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
