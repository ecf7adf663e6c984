//! DMA controller and transfer leases
//!
//! The card's DMA controller stages data from card memory into one host
//! buffer at a time. Only one read may use that buffer at any instant, so the
//! controller hands out a [`DmaLease`]: the staged bytes stay valid, and
//! every other reader waits, until the lease is dropped.
//!
//! The actual staging is done by a host-provided [`DmaEngine`].
//! [`MemoryDmaEngine`] stands in for hardware over an in-process image.

use crate::error::{Amc525Error, IoError, ResourceError};
use std::fmt::Debug;
use std::ops::Deref;
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};
use tracing::{debug, info};

/// Host-side DMA staging primitive
///
/// Implemented by the host integration (VFIO, a kernel shim, or an emulator).
pub trait DmaEngine: Debug + Send {
    /// Size of the staging buffer: the controller's native transfer granularity
    fn buffer_size(&self) -> usize;

    /// Copy up to `len` bytes from card `address` into the staging buffer
    ///
    /// Returns the number of bytes staged, never more than `len` or
    /// [`DmaEngine::buffer_size`]. Fewer bytes than asked is not an error.
    ///
    /// # Errors
    ///
    /// Returns the engine's I/O error if the transfer could not be started.
    fn stage(&mut self, address: u64, len: usize) -> std::io::Result<usize>;

    /// The staging buffer as last filled by [`DmaEngine::stage`]
    fn staged(&self) -> &[u8];
}

/// Serialises access to one [`DmaEngine`]
#[derive(Debug)]
pub struct DmaController {
    engine: Mutex<Box<dyn DmaEngine>>,
    buffer_size: usize,
}

impl DmaController {
    /// Take ownership of an engine
    pub fn new(engine: impl DmaEngine + 'static) -> Self {
        Self::from_boxed(Box::new(engine))
    }

    /// Take ownership of an already boxed engine
    pub fn from_boxed(engine: Box<dyn DmaEngine>) -> Self {
        let buffer_size = engine.buffer_size();
        info!("DMA controller ready: {buffer_size} byte staging buffer");
        Self {
            engine: Mutex::new(engine),
            buffer_size,
        }
    }

    /// Native transfer granularity in bytes
    pub const fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Stage `[address, address + count)` and hold the controller
    ///
    /// Blocks while another lease is outstanding. At most
    /// [`DmaController::buffer_size`] bytes are staged.
    ///
    /// # Errors
    ///
    /// Returns `IoError::Transfer` if the engine fails.
    pub fn lease(&self, address: u64, count: usize) -> Result<DmaLease<'_>, IoError> {
        let guard = self.engine.lock().unwrap_or_else(PoisonError::into_inner);
        self.stage(guard, address, count)
    }

    /// Like [`DmaController::lease`] but never waits
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::LeaseBusy` if another lease is outstanding,
    /// or `IoError::Transfer` if the engine fails.
    pub fn try_lease(&self, address: u64, count: usize) -> Result<DmaLease<'_>, Amc525Error> {
        let guard = match self.engine.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Err(ResourceError::LeaseBusy.into()),
        };
        Ok(self.stage(guard, address, count)?)
    }

    fn stage<'a>(
        &self,
        mut guard: MutexGuard<'a, Box<dyn DmaEngine>>,
        address: u64,
        count: usize,
    ) -> Result<DmaLease<'a>, IoError> {
        let requested = count.min(self.buffer_size);
        let staged = guard.stage(address, requested)?;
        let len = staged.min(requested).min(guard.staged().len());
        debug!("DMA lease: {len} of {requested} bytes at {address:#x}");
        Ok(DmaLease { guard, len })
    }
}

/// Exclusive hold on the DMA controller plus the bytes it staged
///
/// Dereferences to the staged data. Dropping the lease releases the
/// controller.
pub struct DmaLease<'a> {
    guard: MutexGuard<'a, Box<dyn DmaEngine>>,
    len: usize,
}

impl Debug for DmaLease<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmaLease").field("len", &self.len).finish()
    }
}

impl Deref for DmaLease<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.guard.staged()[..self.len]
    }
}

/// In-process DMA engine over a byte image of card memory
///
/// Card address `base` maps to the first byte of the image. Reads that run
/// past the end of the image are cut short.
#[derive(Debug)]
pub struct MemoryDmaEngine {
    memory: Vec<u8>,
    base: u64,
    buffer_size: usize,
    staging: Vec<u8>,
}

impl MemoryDmaEngine {
    /// Default staging buffer size
    pub const DEFAULT_BUFFER_SIZE: usize = 4096;

    /// Engine over `memory` starting at card address 0
    pub fn new(memory: Vec<u8>, buffer_size: usize) -> Self {
        Self::with_base(memory, 0, buffer_size)
    }

    /// Engine over `memory` starting at card address `base`
    ///
    /// A `buffer_size` of 0 is kept as is; attaching a device with such an
    /// engine fails.
    pub fn with_base(memory: Vec<u8>, base: u64, buffer_size: usize) -> Self {
        Self {
            memory,
            base,
            buffer_size,
            staging: Vec::with_capacity(buffer_size),
        }
    }
}

impl DmaEngine for MemoryDmaEngine {
    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn stage(&mut self, address: u64, len: usize) -> std::io::Result<usize> {
        let start = address
            .checked_sub(self.base)
            .and_then(|offset| usize::try_from(offset).ok())
            .filter(|&offset| offset <= self.memory.len())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("card address {address:#x} outside memory image"),
                )
            })?;
        let end = start + len.min(self.buffer_size()).min(self.memory.len() - start);

        self.staging.clear();
        self.staging.extend_from_slice(&self.memory[start..end]);
        Ok(self.staging.len())
    }

    fn staged(&self) -> &[u8] {
        &self.staging
    }
}
