//! Failure classification shared by every lambdarun component

use thiserror::Error;

/// The ways a run can go wrong
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Handler path unresolvable or malformed
    ResolutionError,
    /// Event, context or stream record text invalid
    ParseError,
    /// Handler exceeded its deadline
    TimeoutError,
    /// Any other failure raised by the handler body
    HandlerError,
    /// The output sink stopped accepting writes
    OutputError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResolutionError => "ResolutionError",
            Self::ParseError => "ParseError",
            Self::TimeoutError => "TimeoutError",
            Self::HandlerError => "HandlerError",
            Self::OutputError => "OutputError",
        }
    }

    /// Fatal kinds abort the run; the rest are converted to sentinel outcomes.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::ResolutionError | Self::ParseError | Self::OutputError => true,
            Self::TimeoutError | Self::HandlerError => false,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payload that could not be parsed into a structured value
#[derive(Debug, Error)]
#[error("There was a problem parsing your JSON event ({origin}): {source}")]
pub struct ParseError {
    /// Where the text came from, e.g. a file name or `stream line 3`
    pub origin: String,
    #[source]
    pub source: serde_json::Error,
}

impl ParseError {
    pub fn new(origin: impl Into<String>, source: serde_json::Error) -> Self {
        Self {
            origin: origin.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ParseError
    }
}

/// A payload source that could not be opened or read
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("There was a problem reading {path}: File not found / readable! ({source})")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Opened fine, but the bytes could not be read as text
    #[error("There was a problem reading {origin}: {source}")]
    Read {
        origin: String,
        #[source]
        source: std::io::Error,
    },
}

impl SourceError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn read(origin: impl Into<String>, source: std::io::Error) -> Self {
        Self::Read {
            origin: origin.into(),
            source,
        }
    }

    /// Unreadable input is a configuration problem, reported like a bad payload.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ParseError
    }
}
