use core::convert::Infallible;
use thiserror::Error;

pub mod syscall_error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum KernelError {
    #[error("Cannot allocate memory")]
    NoMemory,

    #[error("Memory region not found")]
    NoMemRegion,

    #[error("Invalid value")]
    InvalidValue,

    #[error("Not an open file descriptor")]
    BadFd,

    #[error("Fault accessing user memory")]
    Fault,
}

pub type Result<T> = core::result::Result<T, KernelError>;

impl From<Infallible> for KernelError {
    fn from(error: Infallible) -> Self {
        match error {}
    }
}
