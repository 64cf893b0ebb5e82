//! Kernel-internal error type.
//!
//! Mirrors the syscall error taxonomy one-to-one so handlers can propagate
//! with `?` and convert to a return value at the syscall boundary with
//! [`KError::as_retval`].

use panda_abi::ErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KError {
    InvalidArgument,
    NoSuchObject,
    RightsDenied,
    NotSupported,
    NameExists,
    NameNotFound,
    NoMemory,
    WouldBlock,
    EndOfStream,
    Truncated,
    TimedOut,
    AlreadyClosed,
}

impl KError {
    pub fn code(self) -> ErrorCode {
        match self {
            KError::InvalidArgument => ErrorCode::InvalidArgument,
            KError::NoSuchObject => ErrorCode::NoSuchObject,
            KError::RightsDenied => ErrorCode::RightsDenied,
            KError::NotSupported => ErrorCode::NotSupported,
            KError::NameExists => ErrorCode::NameExists,
            KError::NameNotFound => ErrorCode::NameNotFound,
            KError::NoMemory => ErrorCode::NoMemory,
            KError::WouldBlock => ErrorCode::WouldBlock,
            KError::EndOfStream => ErrorCode::EndOfStream,
            KError::Truncated => ErrorCode::Truncated,
            KError::TimedOut => ErrorCode::TimedOut,
            KError::AlreadyClosed => ErrorCode::AlreadyClosed,
        }
    }

    pub fn as_retval(self) -> isize {
        self.code().as_retval()
    }
}

pub type KResult<T> = Result<T, KError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retval_is_negative() {
        assert!(KError::InvalidArgument.as_retval() < 0);
        assert!(KError::AlreadyClosed.as_retval() < 0);
    }

    #[test]
    fn distinct_codes_have_distinct_retvals() {
        assert_ne!(
            KError::InvalidArgument.as_retval(),
            KError::NoSuchObject.as_retval()
        );
    }
}
