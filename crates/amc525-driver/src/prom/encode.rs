//! PROM encoding
//!
//! Produces blobs in the exact layout [`PromContext::load`] accepts. Hosts
//! without a card use this to synthesise a PROM; tests use it to build
//! fixtures.
//!
//! [`PromContext::load`]: super::PromContext::load

use super::{DeviceEntry, DmaEntry, DmaPermissions, EndEntry, PromEntry};
use amc525_chip::prom::{device, dma, end};
use bytes::{BufMut, Bytes, BytesMut};

impl PromEntry {
    /// Append the binary form of this entry to `out`
    ///
    /// Padding declared beyond the payload is written as zeros.
    pub fn encode(&self, out: &mut impl BufMut) {
        out.put_u8(self.tag());
        out.put_u8(self.declared_size());

        let minimum = match self {
            Self::Device(e) => {
                out.put_slice(&e.name);
                device::SIZE
            }
            Self::Dma(e) => {
                out.put_slice(&e.name);
                for shift in [0, 16, 32] {
                    // Truncation intended: the base is split into 16-bit words
                    #[allow(clippy::cast_possible_truncation)]
                    let word = (e.base >> shift) as u16;
                    out.put_u16_le(word);
                }
                out.put_u32_le(e.length);
                out.put_u8(e.perm.bits());
                dma::SIZE
            }
            Self::End(_) => end::SIZE,
        };

        out.put_bytes(0, usize::from(self.declared_size().saturating_sub(minimum)));
    }
}

/// Builder for PROM blobs
///
/// ```
/// use amc525_driver::prom::{DmaPermissions, PromBuilder, PromContext};
///
/// let blob = PromBuilder::new()
///     .device("test_dev")
///     .dma("memA", 0x1000, 0x100, DmaPermissions::READ)
///     .finish();
/// let context = PromContext::load(&blob).unwrap();
/// assert_eq!(context.find_entry(1).unwrap().name_str(), "memA");
/// ```
#[derive(Debug, Default)]
pub struct PromBuilder {
    buf: BytesMut,
}

impl PromBuilder {
    /// Start an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an already decoded or constructed entry
    #[must_use]
    pub fn entry(mut self, entry: &PromEntry) -> Self {
        entry.encode(&mut self.buf);
        self
    }

    /// Append a device descriptor
    ///
    /// Names longer than 8 bytes are truncated.
    #[must_use]
    pub fn device(self, name: &str) -> Self {
        self.entry(&PromEntry::Device(DeviceEntry::new(name)))
    }

    /// Append a DMA region descriptor
    ///
    /// Names longer than 4 bytes are truncated; `base` is cut to 48 bits.
    #[must_use]
    pub fn dma(self, name: &str, base: u64, length: u32, perm: DmaPermissions) -> Self {
        self.entry(&PromEntry::Dma(DmaEntry::new(name, base, length, perm)))
    }

    /// Append an entry with an arbitrary tag and payload
    ///
    /// # Panics
    ///
    /// Panics if the payload is longer than 254 bytes (the size byte would
    /// overflow).
    #[must_use]
    pub fn raw_entry(mut self, entry_tag: u8, payload: &[u8]) -> Self {
        let size = u8::try_from(payload.len() + 1).expect("PROM entry payload exceeds 254 bytes");
        self.buf.put_u8(entry_tag);
        self.buf.put_u8(size);
        self.buf.put_slice(payload);
        self
    }

    /// Bytes written so far, without an end sentinel
    pub fn unterminated(&self) -> &[u8] {
        &self.buf
    }

    /// Append the end sentinel and return the blob
    pub fn finish(self) -> Bytes {
        self.entry(&PromEntry::End(EndEntry::new())).buf.freeze()
    }
}
