//! Driver core for the AMC525 FPGA PCIe card.
//!
//! The card describes itself through a PROM listing a device name and the
//! DMA-addressable regions behind it. This crate provides everything between
//! that description and the endpoints a host exposes:
//!
//! ```text
//! PROM blob ──► PromContext ──► one DmaWindow per DMA entry ─┐
//!                                                            ├─► DmaController (one lease at a time)
//! hardware IRQ ──► InterruptPool::deliver ──► EventReader×8  │
//!                                                            │
//! BAR0 ──► RegisterAccess (raw, bounds-checked)              │
//! ```
//!
//! Host integration points are traits: [`RegisterAccess`] for the register
//! window and [`DmaEngine`] for DMA staging. [`MmioRegion`] and
//! [`MemoryDmaEngine`] / [`MemoryRegisters`] are the provided
//! implementations.
//!
//! # Quick start
//!
//! ```
//! use amc525_driver::prelude::*;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<()> {
//! let prom = PromBuilder::new()
//!     .device("test_dev")
//!     .dma("memA", 0, 0x40, DmaPermissions::READ)
//!     .finish();
//!
//! let registry = BoardRegistry::new(DriverConfig::default())?;
//! let device = Amc525Device::attach(
//!     &registry,
//!     AttachParams {
//!         prom,
//!         registers: Arc::new(MemoryRegisters::new(0x1000)),
//!         dma: Box::new(MemoryDmaEngine::new(vec![0xa5; 0x40], 16)),
//!     },
//! )?;
//!
//! let mut window = device.open_dma("amc525_lamc_priv.0.memA")?;
//! let mut buf = [0u8; 64];
//! let n = window.read(&mut buf)?;
//! assert_eq!(n, 16); // one staging buffer per read
//!
//! let events = device.open_events()?;
//! device.handle_interrupt(0b100);
//! assert_eq!(events.read(false)?, 0b100);
//!
//! device.detach();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

pub mod config;
pub mod device;
pub mod discovery;
pub mod dma;
mod error;
pub mod interrupts;
pub mod mmio;
pub mod prom;
pub mod registry;
mod wait;
pub mod window;

/// Hardware identification constants (re-exported from amc525-chip).
pub mod pcie_ids {
    pub use amc525_chip::pcie::{
        is_amc525, lspci_filter, AMC525_DEVICE_ID, DEVICE_NAME, XILINX_VENDOR_ID,
    };
}

pub use config::DriverConfig;
pub use device::{Amc525Device, AttachParams, Endpoint, EndpointKind, RegisterEndpoint};
pub use dma::{DmaController, DmaEngine, DmaLease, MemoryDmaEngine};
pub use error::{Amc525Error, IoError, ParseError, ResourceError, Result};
pub use interrupts::{EventReader, InterruptPool, SlotId};
pub use mmio::{MemoryRegisters, MmioRegion, RegisterAccess};
pub use prom::{DmaEntry, DmaPermissions, PromBuilder, PromContext, PromEntry};
pub use registry::{BoardRegistry, BoardSlot};
pub use window::DmaWindow;

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        Amc525Device, Amc525Error, AttachParams, BoardRegistry, DmaPermissions, DmaWindow,
        DriverConfig, EventReader, MemoryDmaEngine, MemoryRegisters, PromBuilder, PromContext,
        RegisterAccess, Result,
    };
}
