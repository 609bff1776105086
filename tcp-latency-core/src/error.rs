//! Panic-free internal error convention.
//!
//! The reconstructor and attribution engine are expected to never panic on
//! malformed *input*: a truncated SACK option or a corrupt header is a
//! `bogus` verdict, not a crash. `CoreError::Internal` exists for the
//! opposite case — an invariant this crate itself is responsible for
//! upholding (an arena index that should always resolve, a list that should
//! never be empty at this point) turning out to be violated. Seeing one
//! reported is always a bug in this crate.

use std::fmt;

#[derive(Debug)]
pub struct InternalError {
    pub msg: String,
    pub file: &'static str,
    pub line: u32,
    #[cfg(feature = "backtrace")]
    pub backtrace: backtrace::Backtrace,
}

impl fmt::Display for InternalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "internal error at {}:{}: {}", self.file, self.line, self.msg)
    }
}

#[derive(Debug)]
pub enum CoreError {
    Internal(InternalError),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::Internal(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CoreError {}

macro_rules! build_internal_error {
    ($msg:expr) => {
        $crate::error::CoreError::Internal($crate::error::InternalError {
            msg: $msg.to_string(),
            file: file!(),
            line: line!(),
            #[cfg(feature = "backtrace")]
            backtrace: backtrace::Backtrace::new(),
        })
    };
}

pub(crate) use build_internal_error;

pub type CoreResult<T> = Result<T, CoreError>;
