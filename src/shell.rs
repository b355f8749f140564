use std::io::{self, BufRead, Write};

use log::debug;

use crate::ast::{Command, Job};
use crate::builtins;
use crate::config::Config;
use crate::executor::{self, BuiltinHook};
use crate::jobs::{self, JobTable};
use crate::parser::{self, ReadOutcome};

/// Interpreter state shared by every line it runs.
pub struct Shell {
    config: Config,
    jobs: JobTable,
    /// Nesting level of `source` currently executing.
    source_depth: usize,
}

impl Shell {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            jobs: JobTable::new(),
            source_depth: 0,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn jobs(&self) -> &JobTable {
        &self.jobs
    }

    pub fn jobs_mut(&mut self) -> &mut JobTable {
        &mut self.jobs
    }

    /// Launch `job`; block on it unless it runs in the background.
    pub fn execute(&mut self, mut job: Job) {
        if let Err(err) = executor::launch(&mut job, self) {
            eprintln!("minish: {err}");
        }

        if job.background {
            self.jobs.register(job);
        } else {
            jobs::wait_foreground(&mut job);
        }
        self.jobs.reap();
    }

    /// Parse and run a single commandline.
    #[cfg(test)]
    pub fn run_line(&mut self, line: &str) {
        if let Some(job) = parser::parse_line(line, self.config.max_word_len) {
            self.execute(job);
        }
    }

    /// Run every line of `input` as if typed, until end of input.
    pub fn run_script(&mut self, input: &mut dyn BufRead) -> io::Result<()> {
        loop {
            match parser::read_job(input, self.config.max_word_len)? {
                ReadOutcome::Job(job) => self.execute(job),
                ReadOutcome::Empty => {}
                ReadOutcome::Eof => return Ok(()),
            }
        }
    }

    /// Run `body` one `source` level deeper. Returns `None` when the nesting
    /// limit is reached.
    pub(crate) fn nested<T>(&mut self, body: impl FnOnce(&mut Self) -> T) -> Option<T> {
        if self.source_depth >= self.config.max_source_depth {
            return None;
        }
        self.source_depth += 1;
        let result = body(self);
        self.source_depth -= 1;
        Some(result)
    }

    /// Input ended: settle the remaining background jobs.
    pub fn shutdown(&mut self) {
        self.jobs.drain(self.config.wait_on_exit);
    }
}

impl BuiltinHook for Shell {
    fn run_builtin(&mut self, cmd: &Command) -> bool {
        if !builtins::is_builtin(cmd.program()) {
            return false;
        }

        let mut stdout = io::stdout();
        let mut stderr = io::stderr();
        let status = builtins::execute(self, cmd, &mut stdout, &mut stderr);
        let _ = stdout.flush();
        debug!("builtin {} returned {status}", cmd.program());
        true
    }
}
