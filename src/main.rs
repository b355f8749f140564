#[cfg(not(unix))]
compile_error!("minish drives fork/exec directly and only builds on Unix");

mod ast;
mod builtins;
mod config;
mod error;
mod executor;
mod job_control;
mod jobs;
mod logging;
mod parser;
mod shell;
mod status;
#[cfg(test)]
mod test_support;

use std::io::{self, Write};

use crossterm::tty::IsTty;
use log::debug;

use config::Config;
use parser::ReadOutcome;
use shell::Shell;

fn main() {
    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("minish: {err}; using defaults");
            Config::default()
        }
    };
    logging::init(&config);

    ctrlc::set_handler(|| {
        println!();
        let _ = io::stdout().flush();
    })
    .expect("Failed to set Ctrl-C handler");

    let interactive = io::stdin().is_tty();
    let mut input = io::stdin().lock();
    let mut stdout = io::stdout();
    let mut shell = Shell::new(config);

    loop {
        if interactive {
            print!("{}", shell.config().prompt);
            if stdout.flush().is_err() {
                break;
            }
        }

        match parser::read_job(&mut input, shell.config().max_word_len) {
            Ok(ReadOutcome::Job(job)) => shell.execute(job),
            Ok(ReadOutcome::Empty) => {}
            Ok(ReadOutcome::Eof) => {
                if interactive {
                    println!();
                }
                break;
            }
            Err(error) => {
                eprintln!("minish: error reading input: {error}");
                break;
            }
        }
    }

    if !shell.jobs().is_empty() {
        debug!("input closed with {} background job(s)", shell.jobs().len());
    }
    shell.shutdown();
}
