//! Query codes understood by DMA-window endpoints.
//!
//! Codes follow the Linux `_IO(type, nr)` encoding so that an ioctl-style
//! host integration can pass them through unchanged.

/// Builds a query code: `_IO(type, nr) = (type << 8) | nr`.
#[must_use]
pub const fn io(ty: u8, nr: u8) -> u32 {
    ((ty as u32) << 8) | (nr as u32)
}

/// Query type byte shared by all AMC525 endpoints.
pub const QUERY_TYPE: u8 = b'L';

/// Returns the DMA controller's native transfer granularity in bytes.
pub const BUF_SIZE: u32 = io(QUERY_TYPE, 0);

/// Returns the declared length of the window's DMA region.
pub const DMA_AREA_SIZE: u32 = io(QUERY_TYPE, 1);
