use std::io::{self, BufRead};

use log::warn;

use crate::ast::{Command, Job, OutputMode, OutputRedirect};

/// Default word length limit; longer words are cut down to this many chars.
pub const DEFAULT_MAX_WORD_LEN: usize = 100;

/// A lexical unit of a commandline.
#[derive(Debug, Clone, PartialEq)]
enum Token {
    /// `|`, or `|&` when `merge` is set.
    Pipe { merge: bool },
    /// Any other whitespace-delimited text, operators like `>>` included.
    Word(String),
}

/// Result of reading one line from an input stream.
#[derive(Debug)]
pub enum ReadOutcome {
    Job(Job),
    /// The line held no command.
    Empty,
    /// The stream is exhausted.
    Eof,
}

fn truncate_word(word: &str, max_len: usize) -> String {
    match word.char_indices().nth(max_len) {
        Some((cut, _)) => {
            warn!("word truncated to {max_len} characters: {word}");
            word[..cut].to_string()
        }
        None => word.to_string(),
    }
}

/// Split a line into tokens. A `|` is recognised at the start of any
/// whitespace-delimited word; text glued after it (`|wc`, `|&wc`) is the
/// next word.
fn tokenize(line: &str, max_word_len: usize) -> Vec<Token> {
    let mut tokens = Vec::new();

    for raw in line.split(|c: char| c.is_whitespace() && c != '\n') {
        if raw.is_empty() {
            continue;
        }
        let rest = match raw.strip_prefix('|') {
            Some(after) => match after.strip_prefix('&') {
                Some(after) => {
                    tokens.push(Token::Pipe { merge: true });
                    after
                }
                None => {
                    tokens.push(Token::Pipe { merge: false });
                    after
                }
            },
            None => raw,
        };
        if !rest.is_empty() {
            tokens.push(Token::Word(truncate_word(rest, max_word_len)));
        }
    }

    tokens
}

fn output_mode(word: &str) -> Option<(OutputMode, bool)> {
    match word {
        ">" => Some((OutputMode::CreateExclusive, false)),
        ">!" => Some((OutputMode::Truncate, false)),
        ">>" => Some((OutputMode::Append, false)),
        ">&" => Some((OutputMode::CreateExclusive, true)),
        _ => None,
    }
}

fn is_redirect_operator(word: &str) -> bool {
    word == "<" || output_mode(word).is_some()
}

/// Builds a `Job` token by token.
struct JobBuilder {
    job: Job,
}

impl JobBuilder {
    fn current(&mut self) -> &mut Command {
        // `job.commands` starts with one entry and only ever grows.
        let last = self.job.commands.len() - 1;
        &mut self.job.commands[last]
    }

    fn fed_by_pipe(&self) -> bool {
        self.job.commands.len() > 1
    }

    fn start_stage(&mut self, program: String) {
        let current = self.current();
        if let Some(output) = current.output.take() {
            warn!(
                "{}: output is piped, ignoring redirect to {}",
                current.program(),
                output.path
            );
        }
        self.job.commands.push(Command::new(program));
    }

    fn set_input(&mut self, path: String) {
        if self.fed_by_pipe() {
            warn!(
                "{}: input is piped, ignoring redirect from {path}",
                self.current().program()
            );
            return;
        }
        self.current().input = Some(path);
    }
}

/// Parse one commandline (without its trailing newline) into a `Job`.
///
/// Returns `None` when the line holds no command. Malformed operators never
/// fail the parse: an operator missing its operand leaves the field unset.
pub fn parse_line(line: &str, max_word_len: usize) -> Option<Job> {
    let tokens = tokenize(line, max_word_len);
    let mut i = 0;

    // A leading pipe has no stage to feed from.
    while let Some(Token::Pipe { .. }) = tokens.get(i) {
        warn!("ignoring pipe with no command before it");
        i += 1;
    }

    let Some(Token::Word(program)) = tokens.get(i) else {
        return None;
    };
    let mut builder = JobBuilder {
        job: Job::new(Command::new(program.clone())),
    };
    i += 1;

    let is_last = |idx: usize| idx + 1 == tokens.len();

    // An operand is the next word, unless that word is itself an operator
    // or the trailing background marker.
    let operand = |idx: usize| match tokens.get(idx) {
        Some(Token::Word(w)) if !is_redirect_operator(w) && !(w == "&" && is_last(idx)) => {
            Some(w.clone())
        }
        _ => None,
    };

    while i < tokens.len() {
        match &tokens[i] {
            Token::Pipe { merge } => {
                // A pipe with nothing after it is dropped, `|&` included.
                if let Some(Token::Word(program)) = tokens.get(i + 1) {
                    if *merge {
                        builder.current().merge_stderr = true;
                    }
                    builder.start_stage(program.clone());
                    i += 1;
                }
            }
            Token::Word(word) if word == "<" => {
                if let Some(path) = operand(i + 1) {
                    builder.set_input(path);
                    i += 1;
                }
            }
            Token::Word(word) => {
                if let Some((mode, merge)) = output_mode(word) {
                    if let Some(path) = operand(i + 1) {
                        let current = builder.current();
                        current.merge_stderr = merge;
                        current.output = Some(OutputRedirect { path, mode });
                        i += 1;
                    }
                } else if word == "&" && is_last(i) {
                    builder.job.background = true;
                } else {
                    builder.current().args.push(word.clone());
                }
            }
        }
        i += 1;
    }

    Some(builder.job)
}

/// Read a single line from `input` and parse it.
///
/// Bytes that are not valid UTF-8 are replaced with U+FFFD rather than
/// failing the read.
pub fn read_job(input: &mut dyn BufRead, max_word_len: usize) -> io::Result<ReadOutcome> {
    let mut raw = Vec::new();
    if input.read_until(b'\n', &mut raw)? == 0 {
        return Ok(ReadOutcome::Eof);
    }
    let text = String::from_utf8_lossy(&raw);
    let line = text.trim_end_matches(['\n', '\r']);

    Ok(match parse_line(line, max_word_len) {
        Some(job) => ReadOutcome::Job(job),
        None => ReadOutcome::Empty,
    })
}
