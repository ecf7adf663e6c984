//! Error types for AMC525 driver operations

use thiserror::Error;

/// Result type alias for AMC525 operations
pub type Result<T> = std::result::Result<T, Amc525Error>;

/// PROM decoding failure
///
/// A corrupted PROM is rejected as a whole; no partially decoded table is
/// ever exposed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Malformed tag, truncated entry, or inconsistent size
    #[error("PROM corrupted at offset {offset:#x}: {reason}")]
    Corrupted {
        /// Byte offset of the offending entry
        offset: usize,
        /// What was wrong with it
        reason: &'static str,
    },
}

impl ParseError {
    /// Create a corruption error
    pub const fn corrupted(offset: usize, reason: &'static str) -> Self {
        Self::Corrupted { offset, reason }
    }
}

/// Per-call failure on a DMA window or register window
///
/// The handle stays valid after any of these.
#[derive(Debug, Error)]
pub enum IoError {
    /// Position lies outside the window
    #[error("Position {position:#x} out of range (window length {length:#x})")]
    OutOfRange {
        /// Requested position
        position: u64,
        /// Window length
        length: u64,
    },

    /// Register offset not aligned to the access width
    #[error("Register offset {offset:#x} not {width}-byte aligned")]
    Misaligned {
        /// Requested offset
        offset: usize,
        /// Access width in bytes
        width: usize,
    },

    /// The transfer produced no data for a non-empty request
    #[error("Copy failed: no bytes transferred for a {requested} byte read")]
    CopyFailed {
        /// Bytes requested after clipping
        requested: usize,
    },

    /// The DMA engine reported an error
    #[error("DMA transfer failed: {source}")]
    Transfer {
        /// Underlying engine error
        #[from]
        source: std::io::Error,
    },
}

impl IoError {
    /// Create an out-of-range error
    pub const fn out_of_range(position: u64, length: u64) -> Self {
        Self::OutOfRange { position, length }
    }
}

impl From<IoError> for std::io::Error {
    fn from(err: IoError) -> Self {
        match err {
            IoError::Transfer { source } => source,
            IoError::OutOfRange { .. } | IoError::Misaligned { .. } => {
                Self::new(std::io::ErrorKind::InvalidInput, err)
            }
            IoError::CopyFailed { .. } => Self::new(std::io::ErrorKind::UnexpectedEof, err),
        }
    }
}

/// Contention or exhaustion of a shared driver resource
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    /// Every interrupt reader slot is claimed
    #[error("No free interrupt reader slot")]
    Exhausted,

    /// The DMA transfer path is held by another read
    #[error("DMA controller busy")]
    LeaseBusy,

    /// The slot is not currently claimed
    #[error("Interrupt reader slot {slot} is not claimed")]
    NotClaimed {
        /// Slot number
        slot: usize,
    },

    /// The interrupt pool was closed by device detach
    #[error("Interrupt pool closed")]
    Closed,

    /// Every board number is in use
    #[error("No free board number (limit {max_boards})")]
    NoFreeBoard {
        /// Configured board limit
        max_boards: usize,
    },
}

/// Errors that can occur during AMC525 operations
#[derive(Debug, Error)]
pub enum Amc525Error {
    /// PROM could not be decoded
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Window access failed
    #[error(transparent)]
    Io(#[from] IoError),

    /// Shared resource unavailable
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Unknown query code on an endpoint
    #[error("Invalid query code {code:#x}")]
    InvalidQuery {
        /// Code that was passed
        code: u32,
    },

    /// No endpoint with that name or index
    #[error("Endpoint not found: {name}")]
    EndpointNotFound {
        /// Requested endpoint
        name: String,
    },

    /// A PROM entry cannot be exposed as an endpoint
    #[error("Invalid endpoint {name:?}: {reason}")]
    InvalidEndpoint {
        /// Offending endpoint name
        name: String,
        /// What was wrong with it
        reason: &'static str,
    },

    /// Device attach failed at some stage
    #[error("Attach failed while {stage}: {source}")]
    Attach {
        /// Stage that failed
        stage: &'static str,
        /// Underlying failure
        source: Box<Amc525Error>,
    },

    /// Register BAR mapping failed
    #[error("Mapping failed: {reason}")]
    Mapping {
        /// Reason for failure
        reason: String,
    },

    /// Invalid driver configuration
    #[error("Invalid configuration: {reason}")]
    Config {
        /// Reason for failure
        reason: String,
    },
}

impl Amc525Error {
    /// Create an endpoint not found error
    pub fn endpoint_not_found(name: impl Into<String>) -> Self {
        Self::EndpointNotFound { name: name.into() }
    }

    /// Wrap an error with the attach stage that produced it
    pub fn attach(stage: &'static str, source: impl Into<Self>) -> Self {
        Self::Attach {
            stage,
            source: Box::new(source.into()),
        }
    }

    /// Create a mapping error
    pub fn mapping(reason: impl Into<String>) -> Self {
        Self::Mapping {
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }
}
