//! Process identity.
//!
//! The memory subsystem refers to processes only by PID: shared-memory
//! grants are keyed by it and nothing else about the task model is visible
//! at this layer.

use core::fmt::{self, Display};

/// A process identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub i32);

impl Pid {
    pub fn value(self) -> i32 {
        self.0
    }
}

impl Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
