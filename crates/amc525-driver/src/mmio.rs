//! Register window access
//!
//! BAR0 of the card is a raw FPGA register window. The driver core never
//! interprets it; it only offers bounds-checked 32-bit peek/poke through
//! [`RegisterAccess`], backed either by a real mapping ([`MmioRegion`]) or by
//! plain memory ([`MemoryRegisters`]).

// MMIO registers are naturally aligned by hardware, and offsets are checked
// for 4-byte alignment before any pointer cast
#![allow(clippy::cast_ptr_alignment)]

use crate::error::{Amc525Error, IoError, Result};
use amc525_chip::bar::Bar;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

/// Width of one register access in bytes
pub const REGISTER_WIDTH: usize = 4;

/// Raw 32-bit register access over a fixed-size window
pub trait RegisterAccess: std::fmt::Debug + Send + Sync {
    /// Window size in bytes
    fn size(&self) -> usize;

    /// Read the register at `offset`
    ///
    /// # Errors
    ///
    /// Returns `IoError::OutOfRange` or `IoError::Misaligned` for a bad
    /// offset.
    fn read32(&self, offset: usize) -> std::result::Result<u32, IoError>;

    /// Write the register at `offset`
    ///
    /// # Errors
    ///
    /// Returns `IoError::OutOfRange` or `IoError::Misaligned` for a bad
    /// offset.
    fn write32(&self, offset: usize, value: u32) -> std::result::Result<(), IoError>;
}

/// Validate a register offset against a window of `size` bytes
///
/// # Errors
///
/// Returns `IoError::Misaligned` if `offset` is not a multiple of 4, or
/// `IoError::OutOfRange` if the access would run past the window.
pub fn check_register(offset: usize, size: usize) -> std::result::Result<(), IoError> {
    if offset % REGISTER_WIDTH != 0 {
        return Err(IoError::Misaligned {
            offset,
            width: REGISTER_WIDTH,
        });
    }
    match offset.checked_add(REGISTER_WIDTH) {
        Some(end) if end <= size => Ok(()),
        _ => Err(IoError::out_of_range(offset as u64, size as u64)),
    }
}

/// Shared mapping of a register BAR
///
/// Maps a PCI sysfs `resourceN` file, or any regular file standing in for
/// one. The file stays open for the lifetime of the mapping.
#[derive(Debug)]
pub struct MmioRegion {
    ptr: NonNull<u8>,
    size: usize,
    _file: File,
    path: PathBuf,
}

impl MmioRegion {
    /// Map BAR `bar` of the PCI function at `pci_address` (e.g. `0000:05:00.0`)
    ///
    /// # Errors
    ///
    /// Same as [`MmioRegion::open`].
    pub fn map_bar(pci_address: &str, bar: Bar) -> Result<Self> {
        let path = Path::new("/sys/bus/pci/devices")
            .join(pci_address)
            .join(bar.resource_file());
        Self::open(path)
    }

    /// Map the whole of `path` read-write and shared
    ///
    /// # Errors
    ///
    /// Returns `Amc525Error::Mapping` if the file cannot be opened, is
    /// empty, or cannot be mapped.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!("Mapping register window: {}", path.display());

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| Amc525Error::mapping(format!("Cannot open {}: {e}", path.display())))?;

        let len = file
            .metadata()
            .map_err(|e| Amc525Error::mapping(format!("Cannot stat {}: {e}", path.display())))?
            .len();
        let size = usize::try_from(len)
            .map_err(|_| Amc525Error::mapping(format!("Window of {len} bytes too large")))?;
        if size == 0 {
            return Err(Amc525Error::mapping(format!(
                "{} is empty (device not enabled?)",
                path.display()
            )));
        }

        // SAFETY: mmap of a file we just opened read-write.
        // - size is non-zero and equals the file length
        // - offset 0, READ|WRITE matches the open mode, SHARED so writes
        //   reach the device (or the backing file)
        // - the file is stored in the struct, keeping the fd open until Drop
        //   unmaps the region
        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                0,
            )
        }
        .map_err(|e| Amc525Error::mapping(format!("mmap of {} failed: {e}", path.display())))?;

        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| Amc525Error::mapping("mmap returned a null mapping"))?;

        tracing::info!(
            "Mapped register window {} ({size:#x} bytes at {ptr:p})",
            path.display()
        );

        Ok(Self {
            ptr,
            size,
            _file: file,
            path: path.to_path_buf(),
        })
    }

    /// File backing this mapping
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn register(&self, offset: usize) -> std::result::Result<*mut u32, IoError> {
        check_register(offset, self.size)?;
        // SAFETY: offset + 4 <= size was checked above, so the result stays
        // inside the mapping; the mapping base is page aligned and offset is
        // a multiple of 4, so the u32 pointer is aligned.
        Ok(unsafe { self.ptr.as_ptr().add(offset) }.cast::<u32>())
    }
}

impl RegisterAccess for MmioRegion {
    fn size(&self) -> usize {
        self.size
    }

    fn read32(&self, offset: usize) -> std::result::Result<u32, IoError> {
        let register = self.register(offset)?;
        // SAFETY: register is in bounds and aligned (see `register`).
        // Volatile: the hardware may change the value between reads.
        let value = unsafe { register.read_volatile() };
        tracing::trace!("Read u32 @ {offset:#x} = {value:#x}");
        Ok(value)
    }

    fn write32(&self, offset: usize, value: u32) -> std::result::Result<(), IoError> {
        let register = self.register(offset)?;
        tracing::trace!("Write u32 @ {offset:#x} = {value:#x}");
        // SAFETY: register is in bounds and aligned (see `register`).
        // Volatile: register writes have side effects on the card.
        unsafe { register.write_volatile(value) };
        Ok(())
    }
}

impl Drop for MmioRegion {
    fn drop(&mut self) {
        tracing::debug!("Unmapping register window {}", self.path.display());
        // SAFETY: ptr and size are exactly those returned by and passed to
        // mmap in `open`; Drop runs once and no references outlive self.
        if let Err(e) = unsafe { munmap(self.ptr.as_ptr().cast(), self.size) } {
            tracing::error!("munmap failed during drop: {e}");
        }
    }
}

// SAFETY: Send - the region owns its mapping exclusively and the mapping is
// valid from any thread of the process.
unsafe impl Send for MmioRegion {}

// SAFETY: Sync - every access is a bounds-checked volatile 32-bit load or
// store through a raw pointer; no Rust references into the mapping are ever
// handed out, and size/ptr never change after construction.
unsafe impl Sync for MmioRegion {}

/// Register window backed by process memory
///
/// All registers start at 0. Used where there is no card to map.
#[derive(Debug)]
pub struct MemoryRegisters {
    words: Box<[AtomicU32]>,
}

impl MemoryRegisters {
    /// Window of `size` bytes, rounded down to whole registers
    pub fn new(size: usize) -> Self {
        Self {
            words: (0..size / REGISTER_WIDTH).map(|_| AtomicU32::new(0)).collect(),
        }
    }
}

impl RegisterAccess for MemoryRegisters {
    fn size(&self) -> usize {
        self.words.len() * REGISTER_WIDTH
    }

    fn read32(&self, offset: usize) -> std::result::Result<u32, IoError> {
        check_register(offset, self.size())?;
        Ok(self.words[offset / REGISTER_WIDTH].load(Ordering::Acquire))
    }

    fn write32(&self, offset: usize, value: u32) -> std::result::Result<(), IoError> {
        check_register(offset, self.size())?;
        self.words[offset / REGISTER_WIDTH].store(value, Ordering::Release);
        Ok(())
    }
}
