//! AMC525 device front-end
//!
//! [`Amc525Device::attach`] turns the resources a host integration hands over
//! (PROM blob, register window, DMA engine) into a numbered board with a set
//! of named endpoints:
//!
//! ```text
//! <device_name>.<board>.reg      raw register window (BAR0)
//! <device_name>.<board>.<name>   one DMA window per PROM DMA entry
//! ```
//!
//! Every handle opened on a device holds an `Arc` to the state it uses, so
//! detaching never pulls memory out from under an outstanding read.

use crate::dma::{DmaController, DmaEngine};
use crate::error::{Amc525Error, IoError, Result};
use crate::interrupts::{EventReader, InterruptPool};
use crate::mmio::RegisterAccess;
use crate::prom::PromContext;
use crate::registry::{BoardRegistry, BoardSlot};
use crate::window::DmaWindow;
use amc525_chip::pcie::endpoint_node_name;
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name of the raw register endpoint
pub const REGISTER_ENDPOINT: &str = "reg";

/// Resources handed over by the host when a card appears
#[derive(Debug)]
pub struct AttachParams {
    /// Raw PROM blob as read from the card
    pub prom: Bytes,
    /// Register BAR access
    pub registers: Arc<dyn RegisterAccess>,
    /// DMA staging engine
    pub dma: Box<dyn DmaEngine>,
}

/// What an endpoint gives access to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    /// The raw register window
    Registers,
    /// A DMA region; `index` is the 1-based DMA entry number in the PROM
    Dma {
        /// DMA entry number, as taken by [`PromContext::find_entry`]
        index: usize,
    },
}

/// One named endpoint of an attached board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    name: String,
    kind: EndpointKind,
}

impl Endpoint {
    /// Full node name, e.g. `amc525_lamc_priv.0.memA`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// What the endpoint gives access to
    pub const fn kind(&self) -> EndpointKind {
        self.kind
    }
}

/// Handle on the raw register endpoint
///
/// The core never interprets register contents; this only bounds-checks
/// mappings and single-register accesses.
#[derive(Debug, Clone)]
pub struct RegisterEndpoint {
    registers: Arc<dyn RegisterAccess>,
}

impl RegisterEndpoint {
    /// Register window size in bytes
    pub fn size(&self) -> usize {
        self.registers.size()
    }

    /// Validate a mapping request of `len` bytes at byte `offset`
    ///
    /// # Errors
    ///
    /// Returns `IoError::OutOfRange` if the mapping would extend past the
    /// register window.
    pub fn check_map(&self, offset: u64, len: u64) -> std::result::Result<(), IoError> {
        let size = self.size() as u64;
        match offset.checked_add(len) {
            Some(end) if end <= size => Ok(()),
            end => {
                warn!("Register map area out of range: {offset:#x}+{len:#x}");
                Err(IoError::out_of_range(end.unwrap_or(u64::MAX), size))
            }
        }
    }

    /// Read one register
    ///
    /// # Errors
    ///
    /// See [`RegisterAccess::read32`].
    pub fn read32(&self, offset: usize) -> std::result::Result<u32, IoError> {
        self.registers.read32(offset)
    }

    /// Write one register
    ///
    /// # Errors
    ///
    /// See [`RegisterAccess::write32`].
    pub fn write32(&self, offset: usize, value: u32) -> std::result::Result<(), IoError> {
        self.registers.write32(offset, value)
    }
}

/// An attached AMC525 board
///
/// Fields are declared in reverse order of acquisition, so dropping a device
/// (or a half-built one during attach) releases them last-acquired first.
#[derive(Debug)]
pub struct Amc525Device {
    endpoints: Vec<Endpoint>,
    prom: Arc<PromContext>,
    dma: Arc<DmaController>,
    interrupts: Arc<InterruptPool>,
    registers: Arc<dyn RegisterAccess>,
    board: BoardSlot,
}

impl Amc525Device {
    /// Bring up a board
    ///
    /// Claims a board number, checks the register window, creates the
    /// interrupt pool and DMA controller, decodes the PROM and builds the
    /// endpoint table. On failure everything already acquired is released
    /// again and nothing of the board is visible.
    ///
    /// # Errors
    ///
    /// Returns `Amc525Error::Attach` naming the failed stage.
    pub fn attach(registry: &Arc<BoardRegistry>, params: AttachParams) -> Result<Self> {
        let AttachParams {
            prom,
            registers,
            dma,
        } = params;

        let board = registry
            .claim()
            .map_err(|e| Amc525Error::attach("claiming board number", e))?;
        info!("Detected AMC525, attaching as board {}", board.board());

        if registers.size() == 0 {
            return Err(Amc525Error::attach(
                "mapping registers",
                Amc525Error::mapping("register window is empty"),
            ));
        }
        debug!("Register window: {:#x} bytes", registers.size());

        let interrupts = Arc::new(InterruptPool::new());

        if dma.buffer_size() == 0 {
            return Err(Amc525Error::attach(
                "starting DMA controller",
                Amc525Error::mapping("DMA staging buffer is empty"),
            ));
        }
        let dma = Arc::new(DmaController::from_boxed(dma));

        let prom = PromContext::from_bytes(prom)
            .map_err(|e| Amc525Error::attach("loading PROM", e))?;

        let endpoints = build_endpoints(&registry.config().device_name, board.board(), &prom)
            .map_err(|e| Amc525Error::attach("creating endpoints", e))?;
        for endpoint in &endpoints {
            info!("Created endpoint {}", endpoint.name);
        }

        Ok(Self {
            endpoints,
            prom: Arc::new(prom),
            dma,
            interrupts,
            registers,
            board,
        })
    }

    /// Board number
    pub const fn board(&self) -> usize {
        self.board.board()
    }

    /// Decoded PROM of this board
    pub fn prom(&self) -> &Arc<PromContext> {
        &self.prom
    }

    /// All endpoints, register window first, then DMA regions in PROM order
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Look up an endpoint by full node name
    pub fn endpoint(&self, name: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.name == name)
    }

    /// Open a DMA window by full node name
    ///
    /// # Errors
    ///
    /// Returns `Amc525Error::EndpointNotFound` if no DMA endpoint has that
    /// name.
    pub fn open_dma(&self, name: &str) -> Result<DmaWindow> {
        match self.endpoint(name).map(Endpoint::kind) {
            Some(EndpointKind::Dma { index }) => self.open_dma_index(index),
            _ => Err(Amc525Error::endpoint_not_found(name)),
        }
    }

    /// Open a DMA window by 1-based DMA entry number
    ///
    /// # Errors
    ///
    /// Returns `Amc525Error::EndpointNotFound` for index 0 or an index past
    /// the last DMA entry.
    pub fn open_dma_index(&self, index: usize) -> Result<DmaWindow> {
        let entry = self
            .prom
            .find_entry(index)
            .ok_or_else(|| Amc525Error::endpoint_not_found(format!("DMA entry {index}")))?;
        debug!(
            "Opening DMA window {} on board {}",
            entry.name_str(),
            self.board()
        );
        Ok(DmaWindow::for_entry(Arc::clone(&self.dma), entry))
    }

    /// Claim an interrupt reader slot
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::Exhausted` when every slot is taken, or
    /// `ResourceError::Closed` after detach.
    pub fn open_events(&self) -> Result<EventReader> {
        Ok(EventReader::open(&self.interrupts)?)
    }

    /// The raw register endpoint
    pub fn registers(&self) -> RegisterEndpoint {
        RegisterEndpoint {
            registers: Arc::clone(&self.registers),
        }
    }

    /// Interrupt entry point: fan `events` out to every open reader
    pub fn handle_interrupt(&self, events: u32) {
        self.interrupts.deliver(events);
    }

    /// Shared handle for an interrupt-delivery thread
    pub fn interrupt_pool(&self) -> Arc<InterruptPool> {
        Arc::clone(&self.interrupts)
    }

    /// Tear the board down
    ///
    /// Blocked event readers wake with `ResourceError::Closed`. Windows still
    /// open keep working until dropped; the board number is free again once
    /// this returns.
    pub fn detach(self) {
        drop(self);
    }
}

impl Drop for Amc525Device {
    fn drop(&mut self) {
        self.interrupts.close();
        info!("Removing AMC525 board {}", self.board());
    }
}

/// Endpoint table for one board; rejects names that cannot be node names.
fn build_endpoints(device_name: &str, board: usize, prom: &PromContext) -> Result<Vec<Endpoint>> {
    let mut endpoints = vec![Endpoint {
        name: endpoint_node_name(device_name, board, REGISTER_ENDPOINT),
        kind: EndpointKind::Registers,
    }];
    let mut seen = HashSet::from([REGISTER_ENDPOINT.to_string()]);

    for (position, entry) in prom.dma_entries().enumerate() {
        let short = entry.name_str().into_owned();
        let reason = if short.is_empty() {
            Some("empty name")
        } else if short.contains(['.', '/']) {
            Some("name contains '.' or '/'")
        } else if !seen.insert(short.clone()) {
            Some("duplicate name")
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(Amc525Error::InvalidEndpoint {
                name: short,
                reason,
            });
        }

        endpoints.push(Endpoint {
            name: endpoint_node_name(device_name, board, &short),
            kind: EndpointKind::Dma {
                index: position + 1,
            },
        });
    }

    Ok(endpoints)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriverConfig;
    use crate::dma::MemoryDmaEngine;
    use crate::error::ResourceError;
    use crate::mmio::MemoryRegisters;
    use crate::prom::{DmaPermissions, PromBuilder};

    fn params(prom: Bytes) -> AttachParams {
        AttachParams {
            prom,
            registers: Arc::new(MemoryRegisters::new(0x100)),
            dma: Box::new(MemoryDmaEngine::new((0..=255).collect(), 64)),
        }
    }

    fn sample_prom() -> Bytes {
        PromBuilder::new()
            .device("test_dev")
            .dma("memA", 0, 0x80, DmaPermissions::READ)
            .dma("memB", 0x80, 0x80, DmaPermissions::READ)
            .finish()
    }

    #[test]
    fn test_endpoint_names() {
        let registry = BoardRegistry::new(DriverConfig::default()).unwrap();
        let device = Amc525Device::attach(&registry, params(sample_prom())).unwrap();
        let names: Vec<_> = device.endpoints().iter().map(Endpoint::name).collect();
        assert_eq!(
            names,
            [
                "amc525_lamc_priv.0.reg",
                "amc525_lamc_priv.0.memA",
                "amc525_lamc_priv.0.memB"
            ]
        );
        assert_eq!(
            device.endpoint("amc525_lamc_priv.0.memB").unwrap().kind(),
            EndpointKind::Dma { index: 2 }
        );
    }

    #[test]
    fn test_open_dma_by_name_and_index() {
        let registry = BoardRegistry::new(DriverConfig::default()).unwrap();
        let device = Amc525Device::attach(&registry, params(sample_prom())).unwrap();

        let mut window = device.open_dma("amc525_lamc_priv.0.memB").unwrap();
        assert_eq!(window.base(), 0x80);
        let mut buf = [0u8; 2];
        assert_eq!(window.read(&mut buf).unwrap(), 2);
        assert_eq!(buf, [0x80, 0x81]);

        assert_eq!(device.open_dma_index(1).unwrap().base(), 0);
        assert!(matches!(
            device.open_dma("amc525_lamc_priv.0.reg"),
            Err(Amc525Error::EndpointNotFound { .. })
        ));
        assert!(device.open_dma_index(0).is_err());
        assert!(device.open_dma_index(3).is_err());
    }

    #[test]
    fn test_duplicate_entry_names_rejected() {
        let registry = BoardRegistry::new(DriverConfig::default()).unwrap();
        let prom = PromBuilder::new()
            .dma("mem", 0, 1, DmaPermissions::READ)
            .dma("mem", 1, 1, DmaPermissions::READ)
            .finish();
        let err = Amc525Device::attach(&registry, params(prom)).unwrap_err();
        assert!(matches!(
            err,
            Amc525Error::Attach {
                stage: "creating endpoints",
                ..
            }
        ));
        assert_eq!(registry.claimed_count(), 0);
    }

    #[test]
    fn test_register_endpoint() {
        let registry = BoardRegistry::new(DriverConfig::default()).unwrap();
        let device = Amc525Device::attach(&registry, params(sample_prom())).unwrap();
        let regs = device.registers();

        assert!(regs.check_map(0, 0x100).is_ok());
        assert!(regs.check_map(0x80, 0x80).is_ok());
        assert!(regs.check_map(0x80, 0x81).is_err());
        assert!(regs.check_map(u64::MAX, 2).is_err());

        regs.write32(0x10, 7).unwrap();
        assert_eq!(device.registers().read32(0x10).unwrap(), 7);
    }

    #[test]
    fn test_detach_closes_events() {
        let registry = BoardRegistry::new(DriverConfig::default()).unwrap();
        let device = Amc525Device::attach(&registry, params(sample_prom())).unwrap();
        let reader = device.open_events().unwrap();
        let pool = device.interrupt_pool();

        device.handle_interrupt(0x3);
        device.detach();

        assert_eq!(reader.read(false), Ok(0x3));
        assert_eq!(reader.read(true), Err(ResourceError::Closed));
        assert!(pool.is_closed());
        assert_eq!(registry.claimed_count(), 0);
    }
}
