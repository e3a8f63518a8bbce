//! Format parsers for the gigatune converter.
//!
//! Parses Standard MIDI Files and instrument macro config files into
//! the IR.

mod config;
mod smf;

pub use config::{parse_macro_config, MacroConfig};
pub use smf::{load_smf, SmfFile};

/// Error type for format parsing.
#[derive(Debug)]
pub enum FormatError {
    /// Invalid file header or magic bytes
    InvalidHeader,
    /// Unexpected end of file
    UnexpectedEof,
    /// SMPTE time division or other unsupported timing
    UnsupportedTiming,
    /// I/O error
    Io(String),
}

impl std::fmt::Display for FormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormatError::InvalidHeader => write!(f, "invalid file header"),
            FormatError::UnexpectedEof => write!(f, "unexpected end of file"),
            FormatError::UnsupportedTiming => write!(f, "unsupported time division"),
            FormatError::Io(msg) => write!(f, "i/o error: {}", msg),
        }
    }
}

impl std::error::Error for FormatError {}

impl From<std::io::Error> for FormatError {
    fn from(err: std::io::Error) -> Self {
        FormatError::Io(err.to_string())
    }
}
