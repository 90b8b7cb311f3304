use std::{fmt, io};

/// Library-wide error type.
///
/// `SharedMemory` and `Io` cover segment provisioning (fatal at startup);
/// `Sync` wraps a failed process-shared lock or event primitive, which the
/// callers treat as fatal too. raw_sync reports errors as `Box<dyn Error>`
/// without `Send + Sync`, so the message is captured as a string here.
#[derive(Debug)]
pub enum StoreError {
    SharedMemory(shared_memory::ShmemError),
    Sync(String),
    Io(io::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::SharedMemory(e) => write!(f, "shared memory error: {}", e),
            StoreError::Sync(msg) => write!(f, "synchronization primitive error: {}", msg),
            StoreError::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::SharedMemory(e) => Some(e),
            StoreError::Sync(_) => None,
            StoreError::Io(e) => Some(e),
        }
    }
}

impl From<shared_memory::ShmemError> for StoreError {
    fn from(err: shared_memory::ShmemError) -> Self {
        StoreError::SharedMemory(err)
    }
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        StoreError::Io(err)
    }
}

pub(crate) fn sync_err(err: Box<dyn std::error::Error>) -> StoreError {
    StoreError::Sync(err.to_string())
}
