//! OS process probes used for worker liveness.

/// Whether a process with `pid` currently exists.
///
/// Pids that cannot name a single process (0, or beyond `pid_t`) are never
/// alive. A process owned by another user still counts as alive.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // kill(pid, 0) checks for existence without delivering a signal.
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Without a process probe every recorded pid other than 0 is presumed
/// alive, so a crashed worker is only detected once its heartbeat expires.
#[cfg(not(unix))]
pub fn is_process_alive(pid: u32) -> bool {
    pid != 0
}

/// Ask a process to terminate (SIGTERM). Returns whether the signal was sent.
#[cfg(unix)]
pub fn terminate(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    unsafe { libc::kill(pid, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
pub fn terminate(_pid: u32) -> bool {
    false
}


#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn own_process_is_alive() {
        assert!(is_process_alive(std::process::id()));
    }

    #[test]
    fn unused_pid_is_dead() {
        assert!(!is_process_alive(999_999_999));
    }

    #[test]
    fn group_pids_are_rejected() {
        assert!(!is_process_alive(0));
        assert!(!terminate(0));
        assert!(!terminate(u32::MAX));
    }

    #[test]
    fn terminate_stops_a_child() {
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        assert!(terminate(child.id()));
        let status = child.wait().unwrap();
        assert!(!status.success());
    }
}
