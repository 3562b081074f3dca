//! Error types for picking single traces and for whole surveys.
//!
//! Per-trace failures ([`PickError`]) are absorbed by the survey and recorded as absent or
//! invalid picks. Survey-level failures ([`SurveyError`]) propagate to the caller.
use std::path::PathBuf;

use thiserror::Error;

/// Failure to pick or bound a single trace.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PickError {
    /// The input is not a usable waveform segment (no channels, no samples or a bad sampling
    /// interval).
    #[error("Invalid input: {0}")]
    InvalidInputKind(String),

    /// The characteristic function holds no usable extremum in the searched range.
    #[error("Degenerate signal: {0}")]
    DegenerateSignal(String),

    /// A noise or signal window did not contain a single sample.
    #[error("Empty {window} window")]
    EmptyWindow { window: &'static str },

    /// No sample in the signal window exceeds the noise level.
    #[error("Signal lower than noise level")]
    SignalBelowNoise,

    /// The earliest pick could not be estimated, even after doubling the signal window.
    #[error("Earliest pick not found after {doublings} signal window doubling(s)")]
    InsufficientSignal { doublings: usize },
}

/// Failure of a survey-wide operation.
#[derive(Error, Debug)]
pub enum SurveyError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No shot files found in {obsdir:?}")]
    NoShotFiles { obsdir: PathBuf },

    #[error("Worker failed on shot {shotnumber}, trace {trace_id}: {message} ({failed_units} failed unit(s) in total)")]
    WorkerFailure {
        shotnumber: u32,
        trace_id: u32,
        message: String,
        failed_units: usize,
    },

    #[error("Picking was cancelled after {completed} of {total} traces")]
    Cancelled { completed: usize, total: usize },

    #[error("Could not build the worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Could not access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not parse {path:?} (line {line}): {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Could not read configuration: {0}")]
    Config(#[from] toml::de::Error),
}

impl SurveyError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn parse(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            line,
            message: message.into(),
        }
    }
}
