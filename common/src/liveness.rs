/// Answers whether the process that wrote a lock file is still running.
pub trait ProcessLiveness: std::fmt::Debug + Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

/// `kill(pid, 0)` probe: a process exists if the null signal is delivered or refused with
/// `EPERM`, and is gone when the kernel reports `ESRCH`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalLiveness;

impl ProcessLiveness for SignalLiveness {
    fn is_alive(&self, pid: u32) -> bool {
        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        if raw <= 0 {
            return false;
        }
        match nix::sys::signal::kill(nix::unistd::Pid::from_raw(raw), None) {
            Ok(()) => true,
            Err(nix::errno::Errno::EPERM) => true,
            Err(errno) => {
                tracing::debug!("kill({}, 0): {}", pid, errno);
                false
            }
        }
    }
}
