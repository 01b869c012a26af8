//! Process liveness helpers used by queue and registry reconciliation.

/// Id of the current process.
pub fn current_pid() -> u32 {
    std::process::id()
}

/// Whether a process with this pid currently exists.
#[cfg(unix)]
pub fn pid_is_alive(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    // Signal 0 performs the permission and existence checks only.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    // EPERM: the process exists but belongs to someone else.
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Whether a process with this pid currently exists.
#[cfg(not(unix))]
pub fn pid_is_alive(pid: u32) -> bool {
    // Without a cheap probe, only our own pid is known to be alive.
    pid == current_pid()
}

/// Forcibly terminate a process. Returns false if it could not be signaled.
#[cfg(unix)]
pub fn kill_pid(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 || pid == current_pid() {
        return false;
    }
    unsafe { libc::kill(pid as libc::pid_t, libc::SIGKILL) == 0 }
}

/// Forcibly terminate a process. Returns false if it could not be signaled.
#[cfg(not(unix))]
pub fn kill_pid(_pid: u32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_pid_is_alive() {
        assert!(pid_is_alive(current_pid()));
    }

    #[test]
    fn test_pid_zero_is_not_alive() {
        assert!(!pid_is_alive(0));
    }

    #[cfg(unix)]
    #[test]
    fn test_reaped_child_is_not_alive() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(!pid_is_alive(pid));
    }

    #[test]
    fn test_refuses_to_kill_self() {
        assert!(!kill_pid(current_pid()));
    }
}
