/// Convert a raw `waitpid` status into shell-style exit code semantics.
///
/// Processes terminated by signal map to `128 + signal`.
pub fn exit_code_from_wait_status(raw_status: libc::c_int) -> Option<i32> {
    if libc::WIFEXITED(raw_status) {
        return Some(libc::WEXITSTATUS(raw_status));
    }

    if libc::WIFSIGNALED(raw_status) {
        let signal = libc::WTERMSIG(raw_status);
        return Some(128 + signal);
    }

    None
}
