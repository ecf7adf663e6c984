//! Board numbering
//!
//! Every attached card gets the lowest free board number, which appears in
//! its endpoint names. The registry is owned by whatever constructs the
//! driver and is shared by every device it attaches.

use crate::config::DriverConfig;
use crate::error::{ResourceError, Result};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Allocation bitmap of board numbers plus the driver-wide configuration
#[derive(Debug)]
pub struct BoardRegistry {
    config: DriverConfig,
    boards: AtomicU32,
}

impl BoardRegistry {
    /// Create a registry with every board number free
    ///
    /// # Errors
    ///
    /// Returns `Amc525Error::Config` if the configuration is invalid.
    pub fn new(config: DriverConfig) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            config,
            boards: AtomicU32::new(0),
        }))
    }

    /// Driver configuration
    pub const fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Claim the lowest free board number
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::NoFreeBoard` when all `max_boards` numbers are
    /// in use.
    pub fn claim(self: &Arc<Self>) -> std::result::Result<BoardSlot, ResourceError> {
        for board in 0..self.config.max_boards {
            let bit = 1u32 << board;
            if self.boards.fetch_or(bit, Ordering::AcqRel) & bit == 0 {
                debug!("Claimed board number {board}");
                return Ok(BoardSlot {
                    registry: Arc::clone(self),
                    board,
                });
            }
        }

        warn!("All {} board numbers in use", self.config.max_boards);
        Err(ResourceError::NoFreeBoard {
            max_boards: self.config.max_boards,
        })
    }

    /// Number of boards currently claimed
    pub fn claimed_count(&self) -> usize {
        self.boards.load(Ordering::Acquire).count_ones() as usize
    }

    fn release(&self, board: usize) {
        self.boards.fetch_and(!(1u32 << board), Ordering::AcqRel);
        debug!("Released board number {board}");
    }
}

/// A claimed board number, returned to the registry on drop
#[derive(Debug)]
pub struct BoardSlot {
    registry: Arc<BoardRegistry>,
    board: usize,
}

impl BoardSlot {
    /// The board number
    pub const fn board(&self) -> usize {
        self.board
    }
}

impl Drop for BoardSlot {
    fn drop(&mut self) {
        self.registry.release(self.board);
    }
}
