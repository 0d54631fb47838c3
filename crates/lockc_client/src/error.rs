use lockc_proto::LockId;

use crate::cache::LockState;
use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("lock {0} is not known to this client")]
    UnknownLock(LockId),
    #[error("lock {lid} cannot be released from the {state:?} state")]
    IllegalRelease { lid: LockId, state: LockState },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("callback listener error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
