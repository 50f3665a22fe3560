//! Event payload sources and parsing

use crate::error::{ParseError, SourceError};
use serde_json::Value;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::PathBuf;

/// Token that selects standard input instead of a named file
pub const STDIN_TOKEN: &str = "-";

/// Where event text is read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventSource {
    Stdin,
    File(PathBuf),
}

impl EventSource {
    /// `-` means stdin, anything else is a file path
    pub fn parse(s: &str) -> Self {
        if s == STDIN_TOKEN {
            Self::Stdin
        } else {
            Self::File(PathBuf::from(s))
        }
    }

    /// Human-readable name used in diagnostics
    pub fn label(&self) -> String {
        match self {
            Self::Stdin => "<stdin>".to_string(),
            Self::File(path) => path.display().to_string(),
        }
    }

    /// Open the source for line-oriented reading
    pub fn open(&self) -> Result<Box<dyn BufRead>, SourceError> {
        match self {
            Self::Stdin => Ok(Box::new(BufReader::new(io::stdin()))),
            Self::File(path) => {
                let file = File::open(path).map_err(|e| SourceError::io(self.label(), e))?;
                Ok(Box::new(BufReader::new(file)))
            }
        }
    }
}

/// Read a whole source into memory
pub fn read_to_string(source: &EventSource) -> Result<String, SourceError> {
    let mut reader = source.open()?;
    let mut text = String::new();
    reader
        .read_to_string(&mut text)
        .map_err(|e| SourceError::read(source.label(), e))?;
    Ok(text)
}

/// Parse one self-contained JSON document
pub fn parse_event(text: &str, origin: &str) -> Result<Value, ParseError> {
    serde_json::from_str(text).map_err(|e| ParseError::new(origin, e))
}
