//! PROM descriptor table
//!
//! The card carries a self-describing PROM listing its device name and the
//! DMA-addressable regions behind it. [`PromContext::load`] walks the raw blob
//! once, validating every entry boundary and decoding each entry into a
//! [`PromEntry`]; all later traversal works on the decoded entries only.
//!
//! The binary layout is described in [`amc525_chip::prom`].

mod encode;

pub use encode::PromBuilder;

use crate::error::ParseError;
use amc525_chip::prom::{self as layout, device, dma, tag, HEADER_LEN};
use bytes::{Buf, Bytes};
use std::borrow::Cow;
use std::fmt;
use std::ops::Deref;
use tracing::{debug, error, info};

bitflags::bitflags! {
    /// Host access rights on a DMA region
    ///
    /// Bits outside the named flags are preserved as read from the PROM.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DmaPermissions: u8 {
        /// Region is readable
        const READ = dma::PERM_READ;
        /// Region is writable
        const WRITE = dma::PERM_WRITE;
        /// Region holds executable firmware
        const EXECUTE = dma::PERM_EXECUTE;
    }
}

/// Device descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceEntry {
    name: [u8; device::NAME_LEN],
    declared_size: u8,
    offset: usize,
}

/// DMA region descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaEntry {
    name: [u8; dma::NAME_LEN],
    base: u64,
    length: u32,
    perm: DmaPermissions,
    declared_size: u8,
    offset: usize,
}

/// End-of-table sentinel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndEntry {
    declared_size: u8,
    offset: usize,
}

/// One decoded PROM entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromEntry {
    /// Device descriptor
    Device(DeviceEntry),
    /// DMA region descriptor
    Dma(DmaEntry),
    /// End-of-table sentinel
    End(EndEntry),
}

/// Copies `name` into a fixed NUL-padded field, truncating if too long.
fn name_field<const N: usize>(name: &str) -> [u8; N] {
    let mut field = [0u8; N];
    let len = name.len().min(N);
    field[..len].copy_from_slice(&name.as_bytes()[..len]);
    field
}

/// Name bytes up to the first NUL, lossily decoded.
fn name_str(field: &[u8]) -> Cow<'_, str> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end])
}

impl DeviceEntry {
    /// Create a device entry with the standard declared size
    pub fn new(name: &str) -> Self {
        Self {
            name: name_field(name),
            declared_size: device::SIZE,
            offset: 0,
        }
    }

    /// Raw name field
    pub const fn name(&self) -> &[u8; device::NAME_LEN] {
        &self.name
    }

    /// Name as text, stopping at the first NUL
    pub fn name_str(&self) -> Cow<'_, str> {
        name_str(&self.name)
    }

    /// Size byte as found in the PROM
    pub const fn declared_size(&self) -> u8 {
        self.declared_size
    }

    /// Byte offset of this entry in the blob
    pub const fn offset(&self) -> usize {
        self.offset
    }
}

impl DmaEntry {
    /// Create a DMA entry with the standard declared size
    ///
    /// `base` is truncated to the 48 bits the PROM can represent.
    pub fn new(name: &str, base: u64, length: u32, perm: DmaPermissions) -> Self {
        Self {
            name: name_field(name),
            base: base & dma::BASE_MASK,
            length,
            perm,
            declared_size: dma::SIZE,
            offset: 0,
        }
    }

    /// Raw name field
    pub const fn name(&self) -> &[u8; dma::NAME_LEN] {
        &self.name
    }

    /// Name as text, stopping at the first NUL
    pub fn name_str(&self) -> Cow<'_, str> {
        name_str(&self.name)
    }

    /// Card address of the first byte of the region (48-bit)
    pub const fn base(&self) -> u64 {
        self.base
    }

    /// Length of the region in bytes
    pub const fn length(&self) -> u32 {
        self.length
    }

    /// Host access rights
    pub const fn perm(&self) -> DmaPermissions {
        self.perm
    }

    /// Size byte as found in the PROM
    pub const fn declared_size(&self) -> u8 {
        self.declared_size
    }

    /// Byte offset of this entry in the blob
    pub const fn offset(&self) -> usize {
        self.offset
    }
}

impl EndEntry {
    /// Create an end sentinel with the standard declared size
    pub const fn new() -> Self {
        Self {
            declared_size: layout::end::SIZE,
            offset: 0,
        }
    }

    /// Size byte as found in the PROM
    pub const fn declared_size(&self) -> u8 {
        self.declared_size
    }

    /// Byte offset of this entry in the blob
    pub const fn offset(&self) -> usize {
        self.offset
    }
}

impl Default for EndEntry {
    fn default() -> Self {
        Self::new()
    }
}

impl PromEntry {
    /// Tag byte of this entry
    pub const fn tag(&self) -> u8 {
        match self {
            Self::Device(_) => tag::DEVICE,
            Self::Dma(_) => tag::DMA,
            Self::End(_) => tag::END,
        }
    }

    /// Size byte of this entry
    pub const fn declared_size(&self) -> u8 {
        match self {
            Self::Device(e) => e.declared_size,
            Self::Dma(e) => e.declared_size,
            Self::End(e) => e.declared_size,
        }
    }

    /// Byte offset of this entry in the blob
    pub const fn offset(&self) -> usize {
        match self {
            Self::Device(e) => e.offset,
            Self::Dma(e) => e.offset,
            Self::End(e) => e.offset,
        }
    }

    /// Total bytes occupied by this entry, tag included
    pub const fn encoded_len(&self) -> usize {
        layout::entry_len(self.declared_size())
    }

    /// Whether this is the end sentinel
    pub const fn is_end(&self) -> bool {
        matches!(self, Self::End(_))
    }

    /// The DMA descriptor, if this is one
    pub const fn as_dma(&self) -> Option<&DmaEntry> {
        match self {
            Self::Dma(e) => Some(e),
            _ => None,
        }
    }

    /// The device descriptor, if this is one
    pub const fn as_device(&self) -> Option<&DeviceEntry> {
        match self {
            Self::Device(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for PromEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device(e) => write!(f, "device {:?}", e.name_str()),
            Self::Dma(e) => write!(
                f,
                "dma {:?} base={:#014x} length={:#010x} perm={:#04x}",
                e.name_str(),
                e.base,
                e.length,
                e.perm.bits()
            ),
            Self::End(_) => write!(f, "end"),
        }
    }
}

/// Decodes the entry starting at `offset`, validating its bounds.
fn decode_entry(buffer: &[u8], offset: usize) -> Result<PromEntry, ParseError> {
    let header = buffer
        .get(offset..offset + HEADER_LEN)
        .ok_or(ParseError::corrupted(offset, "truncated entry header"))?;
    let (entry_tag, size) = (header[0], header[1]);

    let min_size =
        layout::min_size(entry_tag).ok_or(ParseError::corrupted(offset, "unrecognised tag"))?;
    if size == 0 {
        return Err(ParseError::corrupted(offset, "zero entry size"));
    }
    if size < min_size {
        return Err(ParseError::corrupted(offset, "entry size too small for tag"));
    }

    let mut body = buffer
        .get(offset + HEADER_LEN..offset + layout::entry_len(size))
        .ok_or(ParseError::corrupted(offset, "entry runs past end of buffer"))?;

    let entry = match entry_tag {
        tag::DEVICE => {
            let mut name = [0u8; device::NAME_LEN];
            body.copy_to_slice(&mut name);
            PromEntry::Device(DeviceEntry {
                name,
                declared_size: size,
                offset,
            })
        }
        tag::DMA => {
            let mut name = [0u8; dma::NAME_LEN];
            body.copy_to_slice(&mut name);
            let base = u64::from(body.get_u16_le())
                | u64::from(body.get_u16_le()) << 16
                | u64::from(body.get_u16_le()) << 32;
            let length = body.get_u32_le();
            let perm = DmaPermissions::from_bits_retain(body.get_u8());
            PromEntry::Dma(DmaEntry {
                name,
                base,
                length,
                perm,
                declared_size: size,
                offset,
            })
        }
        _ => PromEntry::End(EndEntry {
            declared_size: size,
            offset,
        }),
    };

    Ok(entry)
}

/// Decoded, immutable PROM table
///
/// Built once at attach; shared read-only afterwards, so it needs no locking.
#[derive(Debug, Clone)]
pub struct PromContext {
    /// Blob up to and including the end sentinel
    raw: Bytes,
    /// Decoded entries; the last one is always the end sentinel
    entries: Vec<PromEntry>,
}

impl PromContext {
    /// Decode and validate a PROM blob
    ///
    /// Bytes after the end sentinel are ignored.
    ///
    /// # Errors
    ///
    /// Returns `ParseError::Corrupted` if any tag is unrecognised, any size is
    /// zero or too small for its tag, an entry runs past the buffer, or the
    /// buffer ends before an end sentinel.
    pub fn load(buffer: &[u8]) -> Result<Self, ParseError> {
        Self::from_bytes(Bytes::copy_from_slice(buffer))
    }

    /// Decode and validate a PROM blob already held in a [`Bytes`]
    ///
    /// # Errors
    ///
    /// Same as [`PromContext::load`].
    pub fn from_bytes(buffer: Bytes) -> Result<Self, ParseError> {
        debug!("Loading PROM ({} bytes available)", buffer.len());

        let mut entries = Vec::new();
        let mut offset = 0;
        loop {
            let entry = decode_entry(&buffer, offset).inspect_err(|e| {
                error!("Rejecting PROM: {e}");
            })?;
            debug!("PROM entry at {offset:#x}: {entry}");

            offset += entry.encoded_len();
            entries.push(entry);
            if entry.is_end() {
                break;
            }
        }

        let raw = buffer.slice(..offset);
        info!(
            "Loaded PROM: {} entries in {} bytes",
            entries.len() - 1,
            raw.len()
        );

        Ok(Self { raw, entries })
    }

    /// The validated blob, up to and including the end sentinel
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Length of the validated blob
    pub fn data_len(&self) -> usize {
        self.raw.len()
    }

    /// Number of entries before the end sentinel
    pub fn entry_count(&self) -> usize {
        self.entries.len() - 1
    }

    /// Entries before the end sentinel, in PROM order
    pub fn entries(&self) -> &[PromEntry] {
        &self.entries[..self.entry_count()]
    }

    /// All DMA descriptors, in PROM order
    pub fn dma_entries(&self) -> impl Iterator<Item = &DmaEntry> + '_ {
        self.entries.iter().filter_map(PromEntry::as_dma)
    }

    /// The first device descriptor, if any
    pub fn device(&self) -> Option<&DeviceEntry> {
        self.entries.iter().find_map(PromEntry::as_device)
    }

    /// Cursor on the first entry
    ///
    /// For an empty table this is already the end sentinel.
    pub fn first_entry(&self) -> EntryRef<'_> {
        EntryRef {
            entries: &self.entries,
            index: 0,
        }
    }

    /// The `index`-th DMA descriptor, counting from 1
    ///
    /// Returns `None` for index 0 or when the walk reaches the end sentinel
    /// first.
    pub fn find_entry(&self, index: usize) -> Option<&DmaEntry> {
        let mut cursor = self.first_entry();
        let mut seen = 0;
        while !cursor.is_end() {
            if let PromEntry::Dma(entry) = cursor.entry() {
                seen += 1;
                if seen == index {
                    return Some(entry);
                }
            }
            cursor = cursor.next_entry();
        }
        None
    }

    /// Re-encode the decoded table
    ///
    /// Identical to [`PromContext::raw`] unless some entry declared padding
    /// beyond its payload, which is re-emitted as zeros.
    pub fn encode(&self) -> Bytes {
        let mut out = bytes::BytesMut::with_capacity(self.raw.len());
        for entry in &self.entries {
            entry.encode(&mut out);
        }
        out.freeze()
    }
}

/// Position in a decoded PROM table
///
/// Dereferences to the entry it points at.
#[derive(Debug, Clone, Copy)]
pub struct EntryRef<'a> {
    entries: &'a [PromEntry],
    index: usize,
}

impl<'a> EntryRef<'a> {
    /// The entry at this position
    pub fn entry(&self) -> &'a PromEntry {
        &self.entries[self.index]
    }

    /// Zero-based position in traversal order
    pub const fn position(&self) -> usize {
        self.index
    }

    /// The entry that follows this one
    ///
    /// On the end sentinel this returns the sentinel again.
    #[must_use]
    pub fn next_entry(&self) -> Self {
        if self.entry().is_end() {
            *self
        } else {
            Self {
                entries: self.entries,
                index: self.index + 1,
            }
        }
    }
}

impl Deref for EntryRef<'_> {
    type Target = PromEntry;

    fn deref(&self) -> &PromEntry {
        self.entry()
    }
}
