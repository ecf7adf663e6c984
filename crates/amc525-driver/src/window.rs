//! Bounded reader over one DMA region
//!
//! A [`DmaWindow`] exposes `[base, base + length)` of card memory as a
//! seekable byte stream. Each read stages at most one controller buffer, so a
//! large read returns short; callers loop exactly as with any
//! [`std::io::Read`].
//!
//! The cursor behaves like a ring: a read that lands exactly on the end of
//! the window rewinds it to 0, and a read issued with the cursor at the end
//! (after a seek) returns 0 and rewinds. Because of the former,
//! [`std::io::Read::read_to_end`] never sees end-of-data on a window; read
//! [`DmaWindow::region_size`] bytes instead.

use crate::dma::DmaController;
use crate::error::{Amc525Error, IoError, Result};
use crate::prom::DmaEntry;
use amc525_chip::query;
use std::io::{self, SeekFrom};
use std::sync::Arc;
use tracing::trace;

/// Read cursor on one DMA region
///
/// Each window owns its cursor; the controller is shared by every window of a
/// device and serialises their transfers.
#[derive(Debug, Clone)]
pub struct DmaWindow {
    controller: Arc<DmaController>,
    base: u64,
    length: u64,
    cursor: u64,
}

impl DmaWindow {
    /// Open a window on `[base, base + length)` with the cursor at 0
    pub fn open(controller: Arc<DmaController>, base: u64, length: u64) -> Self {
        Self {
            controller,
            base,
            length,
            cursor: 0,
        }
    }

    /// Open a window on the region a PROM entry describes
    pub fn for_entry(controller: Arc<DmaController>, entry: &DmaEntry) -> Self {
        Self::open(controller, entry.base(), u64::from(entry.length()))
    }

    /// Card address of the first byte of the window
    pub const fn base(&self) -> u64 {
        self.base
    }

    /// Window length in bytes
    pub const fn region_size(&self) -> u64 {
        self.length
    }

    /// Current cursor, relative to the window base
    pub const fn position(&self) -> u64 {
        self.cursor
    }

    /// Largest number of bytes a single read can return
    pub fn transfer_granularity(&self) -> usize {
        self.controller.buffer_size()
    }

    /// Copy bytes at the cursor into `buf`
    ///
    /// Returns the number of bytes copied, never more than the transfer
    /// granularity. At the end of the window returns 0 and rewinds the cursor
    /// to 0. An empty `buf` returns 0 without touching the controller.
    ///
    /// # Errors
    ///
    /// - `IoError::OutOfRange` if the cursor lies past the end of the window,
    ///   or its card address does not fit in 64 bits
    /// - `IoError::CopyFailed` if the controller staged nothing
    /// - `IoError::Transfer` if the DMA engine failed
    ///
    /// The cursor is unchanged on error.
    pub fn read(&mut self, buf: &mut [u8]) -> std::result::Result<usize, IoError> {
        if self.cursor == self.length {
            self.cursor = 0;
            return Ok(0);
        }
        if self.cursor > self.length {
            return Err(IoError::out_of_range(self.cursor, self.length));
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let remaining = self.length - self.cursor;
        let count = usize::try_from(remaining).map_or(buf.len(), |left| left.min(buf.len()));

        let address = self
            .base
            .checked_add(self.cursor)
            .ok_or_else(|| IoError::out_of_range(self.cursor, self.length))?;
        let copied = {
            let lease = self.controller.lease(address, count)?;
            buf[..lease.len()].copy_from_slice(&lease);
            lease.len()
        };
        if copied == 0 {
            return Err(IoError::CopyFailed { requested: count });
        }

        trace!(
            "DMA window {:#x}: read {copied} bytes at {:#x}",
            self.base,
            self.cursor
        );
        self.cursor += copied as u64;
        if self.cursor == self.length {
            self.cursor = 0;
        }
        Ok(copied)
    }

    /// Move the cursor
    ///
    /// `SeekFrom::End` is relative to the window length. Positions equal to
    /// the length are allowed.
    ///
    /// # Errors
    ///
    /// Returns `IoError::OutOfRange` for a negative target or one past the
    /// window length; the cursor is unchanged.
    pub fn seek(&mut self, pos: SeekFrom) -> std::result::Result<u64, IoError> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.cursor.checked_add_signed(delta),
            SeekFrom::End(delta) => self.length.checked_add_signed(delta),
        };

        match target {
            Some(target) if target <= self.length => {
                self.cursor = target;
                Ok(target)
            }
            _ => Err(IoError::out_of_range(
                target.unwrap_or(u64::MAX),
                self.length,
            )),
        }
    }

    /// Answer an endpoint query
    ///
    /// # Errors
    ///
    /// Returns `Amc525Error::InvalidQuery` for an unrecognised code.
    pub fn query(&self, code: u32) -> Result<u64> {
        match code {
            query::BUF_SIZE => Ok(self.transfer_granularity() as u64),
            query::DMA_AREA_SIZE => Ok(self.length),
            _ => Err(Amc525Error::InvalidQuery { code }),
        }
    }
}

impl io::Read for DmaWindow {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(Self::read(self, buf)?)
    }
}

impl io::Seek for DmaWindow {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Ok(Self::seek(self, pos)?)
    }
}
