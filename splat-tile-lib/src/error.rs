use std::{fmt, io};

#[derive(Debug)]
pub enum TileError {
    MalformedHeader(String),
    CorruptStream(String),
    SchemaMismatch(String),
    InvalidConfig(String),
    IoError(io::Error),
}

impl fmt::Display for TileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileError::MalformedHeader(e) => {
                write!(f, "Malformed PLY header: {}", e)
            }
            TileError::CorruptStream(e) => {
                write!(f, "Corrupt LZ4 block: {}", e)
            }
            TileError::SchemaMismatch(e) => {
                write!(f, "Point data does not match its attribute schema: {}", e)
            }
            TileError::InvalidConfig(e) => {
                write!(f, "Invalid tiler configuration: {}", e)
            }
            TileError::IoError(e) => {
                write!(f, "An I/O error occurred: {}", e)
            }
        }
    }
}

impl std::error::Error for TileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TileError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TileError {
    fn from(e: io::Error) -> Self {
        TileError::IoError(e)
    }
}
