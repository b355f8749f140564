use std::fmt;

/// How an output file is opened when a command's stdout targets a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// `>` and `>&`: fail if the file already exists.
    CreateExclusive,
    /// `>!`: create or truncate.
    Truncate,
    /// `>>`: create or append.
    Append,
}

impl OutputMode {
    /// Flags passed to `open(2)` for this mode.
    #[cfg(unix)]
    pub fn open_flags(self) -> libc::c_int {
        let base = libc::O_WRONLY | libc::O_CREAT;
        match self {
            OutputMode::CreateExclusive => base | libc::O_EXCL,
            OutputMode::Truncate => base | libc::O_TRUNC,
            OutputMode::Append => base | libc::O_APPEND,
        }
    }
}

/// A file target for a command's standard output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRedirect {
    pub path: String,
    pub mode: OutputMode,
}

/// One stage of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Program name followed by its arguments. Never empty.
    pub args: Vec<String>,
    /// `< file`
    pub input: Option<String>,
    /// `>`, `>!`, `>>` or `>& file`
    pub output: Option<OutputRedirect>,
    /// Send stderr wherever stdout goes (`>&` or `|&`).
    pub merge_stderr: bool,
    /// Set by the executor once the stage has been forked.
    pub pid: Option<i32>,
}

impl Command {
    pub fn new(program: String) -> Self {
        Self {
            args: vec![program],
            input: None,
            output: None,
            merge_stderr: false,
            pid: None,
        }
    }

    pub fn program(&self) -> &str {
        &self.args[0]
    }

    /// Arguments after the program name.
    pub fn params(&self) -> &[String] {
        &self.args[1..]
    }
}

/// One parsed commandline: pipe-connected stages plus a disposition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub commands: Vec<Command>,
    /// Trailing `&`: the shell does not block on this job.
    pub background: bool,
    /// Member processes spawned and not yet reaped.
    pub live: usize,
}

impl Job {
    pub fn new(first: Command) -> Self {
        Self {
            commands: vec![first],
            background: false,
            live: 0,
        }
    }

    /// Recorded pids, in pipeline order.
    #[cfg(test)]
    pub fn pids(&self) -> impl Iterator<Item = i32> + '_ {
        self.commands.iter().filter_map(|cmd| cmd.pid)
    }
}

fn redirect_operator(output: &OutputRedirect, merge_stderr: bool) -> &'static str {
    match (output.mode, merge_stderr) {
        (OutputMode::CreateExclusive, true) => ">&",
        (OutputMode::CreateExclusive, false) => ">",
        (OutputMode::Truncate, _) => ">!",
        (OutputMode::Append, _) => ">>",
    }
}

/// Renders the job the way `jobs` lists it; the result parses back to the
/// same job.
impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<&str> = Vec::new();
        let last = self.commands.len().saturating_sub(1);

        for (i, cmd) in self.commands.iter().enumerate() {
            parts.extend(cmd.args.iter().map(String::as_str));
            if let Some(output) = &cmd.output {
                parts.push(redirect_operator(output, cmd.merge_stderr));
                parts.push(&output.path);
            }
            if let Some(input) = &cmd.input {
                parts.push("<");
                parts.push(input);
            }
            if i < last {
                parts.push(if cmd.merge_stderr { "|&" } else { "|" });
            }
        }

        if self.background {
            parts.push("&");
        }

        write!(f, "{}", parts.join(" "))
    }
}
