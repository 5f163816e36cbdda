use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid MAC address {0:?}, expected format aa:bb:cc:dd:ee:ff or aa-bb-cc-dd-ee-ff")]
    InvalidMac(String),
    #[error("invalid interface name {0:?}, expected a name like eth0, wlan0 or enp0s3")]
    InvalidInterfaceName(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("network interface {0} not found")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{command} timed out after {}s", .timeout.as_secs())]
    Timeout { command: String, timeout: Duration },
    #[error("{command} failed with exit code {code}: {}", .stderr.trim())]
    NonZeroExit {
        command: String,
        code: i32,
        stderr: String,
    },
    #[error("unable to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
}

/// Step of the mutation sequence that talks to the external tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Down,
    Setting,
    Up,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Down => write!(f, "down"),
            Self::Setting => write!(f, "set-address"),
            Self::Up => write!(f, "up"),
        }
    }
}

#[derive(Debug, Error)]
pub enum MutationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Interface(#[from] InterfaceError),
    #[error("{stage} stage failed on {interface}: {source}")]
    Command {
        interface: String,
        stage: Stage,
        #[source]
        source: CommandError,
    },
    #[error("{interface} reports {} after change, expected {expected}", .actual.as_deref().unwrap_or("no address"))]
    VerificationMismatch {
        interface: String,
        expected: String,
        actual: Option<String>,
    },
}

impl MutationError {
    /// True if the interface may have been left deactivated.
    pub fn left_down(&self) -> bool {
        matches!(
            self,
            Self::Command {
                stage: Stage::Setting | Stage::Up,
                ..
            }
        )
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Command { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backup not found: {0}")]
    NotFound(String),
    #[error("backup {backup} failed integrity check: {reason}")]
    IntegrityFailed { backup: String, reason: String },
    #[error("unable to inspect interfaces: {0}")]
    InspectionFailed(#[source] CommandError),
    #[error("no interfaces to restore from backup {0}")]
    NothingToRestore(String),
    #[error("invalid backup name {0:?}")]
    InvalidName(String),
    #[error("unsupported backup format {0:?}")]
    UnsupportedFormat(String),
    #[error("invalid backup file {path:?}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unable to serialize {what}: {source}")]
    Serialize {
        what: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unable to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    pub(crate) fn io<P: Into<PathBuf>>(path: P, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
