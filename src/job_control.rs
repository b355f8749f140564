use std::io;

/// What a non-blocking poll learned about a child.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PollOutcome {
    Running,
    /// Reaped, with the shell-style exit code when one could be decoded.
    Exited(Option<i32>),
}

/// Block until the child `pid` exits and reap it.
///
/// Waits on this exact pid so another job's completion is never consumed.
pub(crate) fn wait_for_pid(pid: libc::pid_t) -> io::Result<Option<i32>> {
    let mut raw_status: libc::c_int = 0;

    loop {
        let rc = unsafe { libc::waitpid(pid, &mut raw_status, 0) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(err);
        }

        return Ok(crate::status::exit_code_from_wait_status(raw_status));
    }
}

/// Reap `pid` if it has exited, without blocking.
pub(crate) fn poll_pid(pid: libc::pid_t) -> io::Result<PollOutcome> {
    let mut raw_status: libc::c_int = 0;

    loop {
        let rc = unsafe { libc::waitpid(pid, &mut raw_status, libc::WNOHANG) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(err);
        }

        if rc == 0 {
            return Ok(PollOutcome::Running);
        }

        return Ok(PollOutcome::Exited(crate::status::exit_code_from_wait_status(
            raw_status,
        )));
    }
}
