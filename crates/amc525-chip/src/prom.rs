//! PROM descriptor format.
//!
//! The PROM is a self-describing stream of variable-length entries. Every
//! entry starts with a two byte header:
//!
//! ```text
//! offset  size  field
//! ──────  ────  ───────────────────────────────────────────────
//!   0      1    tag   (END, DEVICE or DMA)
//!   1      1    size  bytes of the entry that follow the tag byte
//! ```
//!
//! so the entry after one at offset `o` starts at `o + 1 + size`. The table
//! is terminated by a single END entry.
//!
//! ```text
//! DEVICE (size 9):  tag size name[8]
//! DMA    (size 16): tag size name[4] base_w0 base_w1 base_w2 length[4] perm
//! END    (size 1):  tag size
//! ```
//!
//! Multi-byte fields are little-endian. The DMA base address is split into
//! three 16-bit words forming a 48-bit address.

/// Entry tag values.
pub mod tag {
    /// End-of-table sentinel.
    pub const END: u8 = 0x00;
    /// Device descriptor.
    pub const DEVICE: u8 = 0x01;
    /// DMA region descriptor.
    pub const DMA: u8 = 0x02;
}

/// Bytes taken by the tag field; `size` counts everything after it.
pub const TAG_LEN: usize = 1;

/// Bytes taken by the tag and size fields together.
pub const HEADER_LEN: usize = 2;

/// Device descriptor layout.
pub mod device {
    /// Length of the name field.
    pub const NAME_LEN: usize = 8;
    /// Declared size of a device entry.
    pub const SIZE: u8 = 9;
}

/// DMA region descriptor layout.
pub mod dma {
    /// Length of the name field.
    pub const NAME_LEN: usize = 4;
    /// Number of 16-bit words holding the base address.
    pub const BASE_WORDS: usize = 3;
    /// Width of the base address in bits.
    pub const BASE_BITS: u32 = 48;
    /// Mask selecting the representable base address bits.
    pub const BASE_MASK: u64 = (1 << BASE_BITS) - 1;
    /// Length of the region length field.
    pub const LENGTH_LEN: usize = 4;
    /// Length of the permission field.
    pub const PERM_LEN: usize = 1;
    /// Declared size of a DMA entry.
    // Truncation impossible: 16 fits in u8
    #[allow(clippy::cast_possible_truncation)]
    pub const SIZE: u8 = (super::HEADER_LEN - super::TAG_LEN
        + NAME_LEN
        + BASE_WORDS * 2
        + LENGTH_LEN
        + PERM_LEN) as u8;

    /// Permission bit: the host may read the region.
    pub const PERM_READ: u8 = 0x04;
    /// Permission bit: the host may write the region.
    pub const PERM_WRITE: u8 = 0x02;
    /// Permission bit: the region holds executable firmware.
    pub const PERM_EXECUTE: u8 = 0x01;
}

/// End sentinel layout.
pub mod end {
    /// Declared size of the end sentinel (the size byte only).
    pub const SIZE: u8 = 1;
}

/// Minimum declared size for an entry with the given tag, or `None` for an
/// unknown tag.
#[must_use]
pub const fn min_size(tag: u8) -> Option<u8> {
    match tag {
        tag::END => Some(end::SIZE),
        tag::DEVICE => Some(device::SIZE),
        tag::DMA => Some(dma::SIZE),
        _ => None,
    }
}

/// Total length in bytes of an entry that declares `size`.
#[must_use]
pub const fn entry_len(size: u8) -> usize {
    TAG_LEN + size as usize
}
