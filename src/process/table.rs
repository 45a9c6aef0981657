//! Live-process accounting.
//!
//! The memory syscalls ask exactly one question about other processes:
//! does this PID name a live process? Processes enroll themselves on
//! creation and leave on drop.

use alloc::collections::BTreeSet;

use libkernel::proc::Pid;
use libkernel::sync::SpinLock;

static LIVE_PIDS: SpinLock<BTreeSet<Pid>> = SpinLock::new(BTreeSet::new());

pub(crate) fn register(pid: Pid) {
    LIVE_PIDS.lock().insert(pid);
}

pub(crate) fn unregister(pid: Pid) {
    LIVE_PIDS.lock().remove(&pid);
}

/// `true` while a process with `pid` is alive.
pub fn pid_exists(pid: Pid) -> bool {
    LIVE_PIDS.lock().contains(&pid)
}
