use std::fs::File;
use std::io::{BufReader, Write};

use crate::ast::Command;
use crate::shell::Shell;

/// The list of all builtin command names.
const BUILTINS: &[&str] = &["cd", "setenv", "unsetenv", "source", "jobs"];

/// Returns true if the command name is a shell builtin.
pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// Execute a builtin command, writing output to the provided streams.
/// Returns the exit code.
///
/// Builtins run in the shell process and ignore the command's redirections.
pub fn execute(
    shell: &mut Shell,
    cmd: &Command,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> i32 {
    let args = cmd.params();
    match cmd.program() {
        "cd" => builtin_cd(args, stderr),
        "setenv" => builtin_setenv(args, stderr),
        "unsetenv" => builtin_unsetenv(args, stderr),
        "source" => builtin_source(shell, args, stderr),
        "jobs" => builtin_jobs(shell, stdout),
        program => {
            let _ = writeln!(stderr, "minish: unknown builtin: {program}");
            1
        }
    }
}

fn builtin_cd(args: &[String], stderr: &mut dyn Write) -> i32 {
    let target = match args.first() {
        Some(dir) => dir.clone(),
        None => match std::env::var("HOME") {
            Ok(home) => home,
            Err(_) => {
                let _ = writeln!(stderr, "cd: HOME not set");
                return 1;
            }
        },
    };

    if let Err(e) = std::env::set_current_dir(&target) {
        let _ = writeln!(stderr, "cd: {target}: {e}");
        return 1;
    }

    0
}

fn builtin_setenv(args: &[String], stderr: &mut dyn Write) -> i32 {
    let [name, value, ..] = args else {
        let _ = writeln!(stderr, "setenv: usage: setenv NAME VALUE");
        return 1;
    };
    if name.is_empty() || name.contains('=') {
        let _ = writeln!(stderr, "setenv: {name}: invalid variable name");
        return 1;
    }
    // SAFETY: the interpreter is single-threaded apart from the Ctrl-C
    // handler, which never touches the environment.
    unsafe { std::env::set_var(name, value) };
    0
}

fn builtin_unsetenv(args: &[String], stderr: &mut dyn Write) -> i32 {
    let Some(name) = args.first() else {
        let _ = writeln!(stderr, "unsetenv: usage: unsetenv NAME");
        return 1;
    };
    if name.is_empty() || name.contains('=') {
        let _ = writeln!(stderr, "unsetenv: {name}: invalid variable name");
        return 1;
    }
    // SAFETY: see `builtin_setenv`.
    unsafe { std::env::remove_var(name) };
    0
}

/// Run each line of a file as if it had been typed.
fn builtin_source(shell: &mut Shell, args: &[String], stderr: &mut dyn Write) -> i32 {
    let Some(path) = args.first() else {
        let _ = writeln!(stderr, "source: usage: source PATH");
        return 1;
    };

    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            let _ = writeln!(stderr, "source: {path}: {e}");
            return 1;
        }
    };

    let mut reader = BufReader::new(file);
    match shell.nested(|shell| shell.run_script(&mut reader)) {
        Some(Ok(())) => 0,
        Some(Err(e)) => {
            let _ = writeln!(stderr, "source: {path}: {e}");
            1
        }
        None => {
            let _ = writeln!(stderr, "source: {path}: nested too deeply");
            1
        }
    }
}

/// List background jobs, newest first, with a 1-based display index.
fn builtin_jobs(shell: &mut Shell, stdout: &mut dyn Write) -> i32 {
    shell.jobs_mut().reap();

    for (index, job) in shell.jobs().iter().enumerate() {
        let _ = writeln!(stdout, "[{}]{:3}Running{:17}{}", index + 1, "", "", job);
    }
    0
}
