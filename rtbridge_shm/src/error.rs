//! Error types for shared memory operations

use thiserror::Error;

/// Coarse classification of [`ShmError`] values.
///
/// Callers that only need to decide between retry, fallback and giving up
/// match on this instead of on individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Segment or ring does not exist.
    NotFound,
    /// Segment key already registered.
    AlreadyExists,
    /// Backend memory or a table slot could not be obtained.
    AllocationFailed,
    /// Caller lacks the privilege for the requested operation.
    PermissionDenied,
    /// Request is malformed or can never succeed.
    InvalidArgument,
    /// Not enough ring space right now.
    WouldBlock,
    /// Registry lock not obtained in time.
    Busy,
    /// Ring contents do not follow the frame protocol.
    ProtocolError,
    /// Ring side already bound to another owner.
    AlreadyBound,
    /// Unrecoverable state.
    Fatal,
}

/// Errors that can occur during shared memory operations
#[derive(Error, Debug)]
pub enum ShmError {
    /// No segment registered under this key
    #[error("Segment not found: key {key}")]
    NotFound {
        /// Segment key
        key: i32,
    },

    /// Segment already exists
    #[error("Segment already exists: key {key}")]
    AlreadyExists {
        /// Segment key
        key: i32,
    },

    /// Backend memory or table slot unavailable
    #[error("Allocation failed: {reason}")]
    AllocationFailed {
        /// What could not be allocated
        reason: String,
    },

    /// Backend refused a privileged operation (page locking, shm open)
    #[error("Permission denied: {reason}")]
    PermissionDenied {
        /// Refused operation
        reason: String,
    },

    /// Segment access policy does not list the caller
    #[error("Access denied to segment {key} for identity {id}")]
    AccessDenied {
        /// Segment key
        key: i32,
        /// Caller identity
        id: i32,
    },

    /// Malformed request
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// Why the request was rejected
        reason: String,
    },

    /// Ring has insufficient free space for the write
    #[error("Ring full: {needed} bytes needed, {free} free")]
    WouldBlock {
        /// Bytes the write requires
        needed: usize,
        /// Bytes currently free
        free: usize,
    },

    /// Registry lock timed out
    #[error("Registry busy")]
    Busy,

    /// Malformed frame data in a ring
    #[error("Protocol error: {reason}")]
    Protocol {
        /// Description of the violation
        reason: String,
    },

    /// Ring side already has an owner
    #[error("Ring {role} already bound to {owner}")]
    AlreadyBound {
        /// "writer" or "reader"
        role: &'static str,
        /// Current owner identity
        owner: i32,
    },

    /// Unrecoverable condition
    #[error("Fatal: {reason}")]
    Fatal {
        /// Description
        reason: String,
    },

    /// IO error
    #[error("IO error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },

    /// Nix system call error
    #[error("System call error: {source}")]
    Nix {
        /// Source nix error
        #[from]
        source: nix::Error,
    },
}

impl ShmError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ShmError::NotFound { .. } => ErrorKind::NotFound,
            ShmError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            ShmError::AllocationFailed { .. } => ErrorKind::AllocationFailed,
            ShmError::PermissionDenied { .. } | ShmError::AccessDenied { .. } => {
                ErrorKind::PermissionDenied
            }
            ShmError::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            ShmError::WouldBlock { .. } => ErrorKind::WouldBlock,
            ShmError::Busy => ErrorKind::Busy,
            ShmError::Protocol { .. } => ErrorKind::ProtocolError,
            ShmError::AlreadyBound { .. } => ErrorKind::AlreadyBound,
            ShmError::Fatal { .. } => ErrorKind::Fatal,
            ShmError::Io { source } => match source.raw_os_error() {
                Some(libc::EPERM) | Some(libc::EACCES) => ErrorKind::PermissionDenied,
                Some(libc::ENOENT) => ErrorKind::NotFound,
                Some(libc::EEXIST) => ErrorKind::AlreadyExists,
                _ => ErrorKind::AllocationFailed,
            },
            ShmError::Nix { source } => match source {
                nix::Error::EPERM | nix::Error::EACCES => ErrorKind::PermissionDenied,
                nix::Error::EINVAL => ErrorKind::InvalidArgument,
                _ => ErrorKind::AllocationFailed,
            },
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        ShmError::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub(crate) fn protocol(reason: impl Into<String>) -> Self {
        ShmError::Protocol {
            reason: reason.into(),
        }
    }
}

/// Result type for shared memory operations
pub type ShmResult<T> = Result<T, ShmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_denied_is_not_backend_permission() {
        let err = ShmError::AccessDenied { key: 7, id: 3 };
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert!(!matches!(err, ShmError::PermissionDenied { .. }));
    }

    #[test]
    fn test_io_errors_classified_by_errno() {
        let err = ShmError::from(std::io::Error::from_raw_os_error(libc::EACCES));
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);

        let err = ShmError::from(std::io::Error::from_raw_os_error(libc::ENOSPC));
        assert_eq!(err.kind(), ErrorKind::AllocationFailed);
    }

    #[test]
    fn test_display_carries_fields() {
        let err = ShmError::WouldBlock { needed: 300, free: 212 };
        assert_eq!(err.to_string(), "Ring full: 300 bytes needed, 212 free");
    }
}
