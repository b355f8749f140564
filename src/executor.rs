use std::ffi::{CString, c_char};
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

use log::debug;

use crate::ast::{Command, Job, OutputMode};
use crate::error::ExecError;

/// Intercepts commands that run inside the shell process instead of being
/// forked.
pub trait BuiltinHook {
    /// Run `cmd` in-process if it names a builtin. Returns `true` when the
    /// command was handled.
    fn run_builtin(&mut self, cmd: &Command) -> bool;
}

/// The pipe between one stage and the next.
struct StagePipe {
    reader: OwnedFd,
    writer: OwnedFd,
}

fn open_pipe() -> Result<StagePipe, ExecError> {
    let (reader, writer) = os_pipe::pipe().map_err(ExecError::Pipe)?;
    // SAFETY: both descriptors are freshly created and handed over by value.
    unsafe {
        Ok(StagePipe {
            reader: OwnedFd::from_raw_fd(reader.into_raw_fd()),
            writer: OwnedFd::from_raw_fd(writer.into_raw_fd()),
        })
    }
}

/// Where a child's standard output is sent.
enum OutputPlan {
    Inherit,
    Pipe(RawFd),
    File {
        path: CString,
        flags: libc::c_int,
        /// Written to stderr if the open fails.
        error_message: Vec<u8>,
    },
}

/// Everything a forked child needs, built before `fork` so that the child
/// only has to make system calls.
struct ChildPlan {
    argv: Vec<CString>,
    /// NULL-terminated pointers into `argv`.
    argv_ptrs: Vec<*const c_char>,
    stdin: Option<RawFd>,
    /// Read end of this stage's out-pipe; belongs to the next stage.
    pipe_reader: Option<RawFd>,
    stdout: OutputPlan,
    merge_stderr: bool,
}

impl ChildPlan {
    fn new(
        cmd: &Command,
        stdin: Option<&OwnedFd>,
        pipe: Option<&StagePipe>,
    ) -> Result<Self, ExecError> {
        let nul_error = || ExecError::NulByte {
            program: cmd.program().to_string(),
        };

        let argv = cmd
            .args
            .iter()
            .map(|arg| CString::new(arg.as_bytes()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| nul_error())?;
        let mut argv_ptrs: Vec<*const c_char> = argv.iter().map(|arg| arg.as_ptr()).collect();
        argv_ptrs.push(std::ptr::null());

        let stdout = match (pipe, &cmd.output) {
            (Some(pipe), _) => OutputPlan::Pipe(pipe.writer.as_raw_fd()),
            (None, Some(output)) => {
                let error_message = match output.mode {
                    OutputMode::CreateExclusive => {
                        format!("minish: redirection would overwrite {}\n", output.path)
                    }
                    _ => format!("minish: {}: cannot open for writing\n", output.path),
                };
                OutputPlan::File {
                    path: CString::new(output.path.as_bytes()).map_err(|_| nul_error())?,
                    flags: output.mode.open_flags(),
                    error_message: error_message.into_bytes(),
                }
            }
            (None, None) => OutputPlan::Inherit,
        };

        Ok(Self {
            argv,
            argv_ptrs,
            stdin: stdin.map(AsRawFd::as_raw_fd),
            pipe_reader: pipe.map(|pipe| pipe.reader.as_raw_fd()),
            stdout,
            merge_stderr: cmd.merge_stderr,
        })
    }
}

/// Runs in the forked child: wire descriptors and exec. Never returns.
///
/// Only async-signal-safe calls are made here; the parent may have other
/// threads (the Ctrl-C handler, the test harness).
unsafe fn spawn_child(plan: &ChildPlan) -> ! {
    unsafe {
        // The shell ignores SIGPIPE; its children must not.
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);

        if let Some(fd) = plan.stdin {
            libc::dup2(fd, libc::STDIN_FILENO);
            libc::close(fd);
        }

        if let Some(fd) = plan.pipe_reader {
            libc::close(fd);
        }

        let out_fd = match &plan.stdout {
            OutputPlan::Inherit => None,
            OutputPlan::Pipe(fd) => Some(*fd),
            OutputPlan::File {
                path,
                flags,
                error_message,
            } => {
                let fd = libc::open(path.as_ptr(), *flags, 0o644 as libc::c_uint);
                if fd < 0 {
                    libc::write(
                        libc::STDERR_FILENO,
                        error_message.as_ptr().cast(),
                        error_message.len(),
                    );
                    libc::_exit(libc::EXIT_FAILURE);
                }
                Some(fd)
            }
        };

        if let Some(fd) = out_fd {
            libc::dup2(fd, libc::STDOUT_FILENO);
            if plan.merge_stderr {
                libc::dup2(fd, libc::STDERR_FILENO);
            }
            libc::close(fd);
        }

        libc::execvp(plan.argv_ptrs[0], plan.argv_ptrs.as_ptr());
        libc::_exit(libc::EXIT_FAILURE)
    }
}

fn fork_stage(plan: &ChildPlan) -> Result<libc::pid_t, ExecError> {
    match unsafe { libc::fork() } {
        -1 => Err(ExecError::Fork(io::Error::last_os_error())),
        // SAFETY: we are the freshly forked child.
        0 => unsafe { spawn_child(plan) },
        pid => Ok(pid),
    }
}

/// Parent side of a spawned stage: record the child and release the
/// descriptors it now owns. Returns the next stage's input.
fn finish_in_parent(
    job: &mut Job,
    index: usize,
    pid: libc::pid_t,
    consumed: Option<OwnedFd>,
    pipe: Option<StagePipe>,
) -> Option<OwnedFd> {
    job.commands[index].pid = Some(pid);
    job.live += 1;
    drop(consumed);
    pipe.map(|StagePipe { reader, writer }| {
        drop(writer);
        reader
    })
}

/// Parent side of a stage that could not be spawned. The next stage still
/// gets the read end, which reports end of input straight away.
fn skip_in_parent(consumed: Option<OwnedFd>, pipe: Option<StagePipe>) -> Option<OwnedFd> {
    drop(consumed);
    pipe.map(|StagePipe { reader, .. }| reader)
}

/// Start every stage of `job`, left to right, wiring pipes between them.
///
/// Stage-local failures (missing input file, NUL byte in an argument) are
/// reported to stderr and the stage is skipped. A failed `pipe` or `fork`
/// stops construction and is returned; stages already spawned stay recorded
/// in `job` so the caller can still wait for them. If `hook` handles a
/// stage as a builtin, construction stops there.
pub fn launch(job: &mut Job, hook: &mut dyn BuiltinHook) -> Result<(), ExecError> {
    let stages = job.commands.len();
    let mut input: Option<OwnedFd> = None;

    for index in 0..stages {
        if hook.run_builtin(&job.commands[index]) {
            debug!(
                "builtin {} ends pipeline at stage {}",
                job.commands[index].program(),
                index + 1
            );
            // Dropping `input` closes the previous stage's read end.
            return Ok(());
        }

        let cmd = &job.commands[index];
        let mut stage_error = None;

        if input.is_none() {
            if let Some(path) = &cmd.input {
                match File::open(path) {
                    Ok(file) => input = Some(OwnedFd::from(file)),
                    Err(source) => {
                        stage_error = Some(ExecError::OpenInput {
                            path: path.clone(),
                            source,
                        })
                    }
                }
            }
        }

        let pipe = if index + 1 < stages {
            Some(open_pipe()?)
        } else {
            None
        };

        let plan = match stage_error {
            Some(err) => Err(err),
            None => ChildPlan::new(cmd, input.as_ref(), pipe.as_ref()),
        };

        input = match plan {
            Ok(plan) => {
                let pid = fork_stage(&plan)?;
                debug!("spawned {} as pid {pid}", plan.argv[0].to_string_lossy());
                finish_in_parent(job, index, pid, input.take(), pipe)
            }
            Err(err) if err.is_stage_local() => {
                eprintln!("minish: {err}");
                skip_in_parent(input.take(), pipe)
            }
            Err(err) => return Err(err),
        };
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_control::wait_for_pid;
    use crate::parser::{DEFAULT_MAX_WORD_LEN, parse_line};
    use crate::test_support::TempDir;

    struct NoBuiltins;

    impl BuiltinHook for NoBuiltins {
        fn run_builtin(&mut self, _cmd: &Command) -> bool {
            false
        }
    }

    /// Treats any command named `fake-builtin` as handled in-process.
    #[derive(Default)]
    struct FakeBuiltin {
        calls: usize,
    }

    impl BuiltinHook for FakeBuiltin {
        fn run_builtin(&mut self, cmd: &Command) -> bool {
            if cmd.program() == "fake-builtin" {
                self.calls += 1;
                true
            } else {
                false
            }
        }
    }

    fn run(line: &str, hook: &mut dyn BuiltinHook) -> Job {
        let mut job = parse_line(line, DEFAULT_MAX_WORD_LEN).unwrap();
        launch(&mut job, hook).unwrap();
        for pid in job.pids() {
            wait_for_pid(pid).unwrap();
        }
        job
    }

    #[test]
    fn records_one_pid_per_stage() {
        let job = run("true | true | true", &mut NoBuiltins);
        let pids: Vec<i32> = job.pids().collect();
        assert_eq!(pids.len(), 3);
        assert_eq!(job.live, 3);
        assert!(job.commands.iter().all(|c| c.pid.is_some()));
        let mut unique = pids.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn pipe_carries_bytes_in_order() {
        let dir = TempDir::new("exec_pipe");
        let out = dir.path().join("out.txt");
        run(
            &format!("printf a\\nb\\nc\\n | cat > {}", out.display()),
            &mut NoBuiltins,
        );
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "a\nb\nc\n");
    }

    #[test]
    fn input_file_feeds_first_stage() {
        let dir = TempDir::new("exec_input");
        let input = dir.write("in.txt", "one\ntwo\nthree\n");
        let out = dir.path().join("count.txt");
        run(
            &format!("cat < {} | wc -l > {}", input.display(), out.display()),
            &mut NoBuiltins,
        );
        assert_eq!(std::fs::read_to_string(&out).unwrap().trim(), "3");
    }

    #[test]
    fn exclusive_redirect_refuses_existing_file() {
        let dir = TempDir::new("exec_excl");
        let out = dir.write("out.txt", "original\n");
        let job = run(&format!("echo replaced > {}", out.display()), &mut NoBuiltins);
        assert_eq!(job.live, 1);
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "original\n");
    }

    #[test]
    fn exclusive_redirect_failure_exits_nonzero() {
        let dir = TempDir::new("exec_excl_status");
        let out = dir.write("out.txt", "x");
        let mut job = parse_line(&format!("echo y > {}", out.display()), DEFAULT_MAX_WORD_LEN)
            .unwrap();
        launch(&mut job, &mut NoBuiltins).unwrap();
        let pid = job.commands[0].pid.unwrap();
        assert_eq!(wait_for_pid(pid).unwrap(), Some(1));
    }

    #[test]
    fn truncate_redirect_replaces_contents() {
        let dir = TempDir::new("exec_trunc");
        let out = dir.write("out.txt", "a much longer original line\n");
        run(&format!("echo new >! {}", out.display()), &mut NoBuiltins);
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "new\n");
    }

    #[test]
    fn append_redirect_keeps_existing_bytes() {
        let dir = TempDir::new("exec_append");
        let out = dir.write("out.txt", "first\n");
        run(&format!("echo second >> {}", out.display()), &mut NoBuiltins);
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn merged_redirect_captures_stderr() {
        let dir = TempDir::new("exec_merge");
        let script = dir.write("both.sh", "echo out\necho err 1>&2\n");
        let out = dir.path().join("all.txt");
        run(
            &format!("sh {} >& {}", script.display(), out.display()),
            &mut NoBuiltins,
        );
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "out\nerr\n");
    }

    #[test]
    fn merged_pipe_carries_stderr() {
        let dir = TempDir::new("exec_merge_pipe");
        let script = dir.write("err.sh", "echo oops 1>&2\n");
        let out = dir.path().join("seen.txt");
        run(
            &format!("sh {} |& cat > {}", script.display(), out.display()),
            &mut NoBuiltins,
        );
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "oops\n");
    }

    #[test]
    fn missing_input_file_skips_stage() {
        let dir = TempDir::new("exec_missing_input");
        let missing = dir.path().join("nope.txt");
        let out = dir.path().join("count.txt");
        let job = run(
            &format!("cat < {} | wc -l > {}", missing.display(), out.display()),
            &mut NoBuiltins,
        );
        assert!(job.commands[0].pid.is_none());
        assert!(job.commands[1].pid.is_some());
        assert_eq!(job.live, 1);
        // The downstream stage saw end of input rather than blocking.
        assert_eq!(std::fs::read_to_string(&out).unwrap().trim(), "0");
    }

    #[test]
    fn exec_failure_exits_nonzero() {
        let mut job = parse_line("definitely-not-a-real-program-xyz", DEFAULT_MAX_WORD_LEN)
            .unwrap();
        launch(&mut job, &mut NoBuiltins).unwrap();
        let pid = job.commands[0].pid.unwrap();
        assert_eq!(wait_for_pid(pid).unwrap(), Some(1));
    }

    #[test]
    fn builtin_stops_pipeline_construction() {
        let mut hook = FakeBuiltin::default();
        let job = run("true | fake-builtin | true", &mut hook);
        assert_eq!(hook.calls, 1);
        assert!(job.commands[0].pid.is_some());
        assert!(job.commands[1].pid.is_none());
        assert!(job.commands[2].pid.is_none());
        assert_eq!(job.live, 1);
    }

    #[test]
    fn builtin_short_circuit_closes_upstream_pipe() {
        // `yes` never exits on its own; it only stops once every copy of
        // the pipe's read end is closed and its next write raises SIGPIPE.
        let mut hook = FakeBuiltin::default();
        let job = run("yes | fake-builtin", &mut hook);
        assert_eq!(hook.calls, 1);
        assert_eq!(job.live, 1);
    }

    #[test]
    fn nul_byte_is_stage_local() {
        let mut job = parse_line("true | true", DEFAULT_MAX_WORD_LEN).unwrap();
        job.commands[0].args.push("bad\0arg".into());
        launch(&mut job, &mut NoBuiltins).unwrap();
        assert!(job.commands[0].pid.is_none());
        let pid = job.commands[1].pid.unwrap();
        assert_eq!(wait_for_pid(pid).unwrap(), Some(0));
    }
}
