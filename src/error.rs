use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures while turning a `Job` into running processes.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("cannot create pipe: {0}")]
    Pipe(#[source] io::Error),
    #[error("cannot fork: {0}")]
    Fork(#[source] io::Error),
    #[error("{path}: {source}")]
    OpenInput {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("{program}: argument contains a NUL byte")]
    NulByte { program: String },
}

impl ExecError {
    /// Whether the rest of the pipeline can still be built.
    pub fn is_stage_local(&self) -> bool {
        matches!(self, ExecError::OpenInput { .. } | ExecError::NulByte { .. })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
