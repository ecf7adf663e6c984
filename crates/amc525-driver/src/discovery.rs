//! PCI discovery
//!
//! Finds AMC525 functions by scanning sysfs for the Xilinx vendor ID and the
//! AMC525 device ID. Only identifies cards; attaching them is up to the host.

use crate::error::{Amc525Error, Result};
use amc525_chip::bar::Bar;
use amc525_chip::pcie::is_amc525;
use std::path::{Path, PathBuf};

/// Default sysfs directory holding one entry per PCI function
pub const SYSFS_PCI_DEVICES: &str = "/sys/bus/pci/devices";

/// An AMC525 found on the PCI bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PciFunction {
    /// Bus address, e.g. `0000:05:00.0`
    pub address: String,

    /// sysfs directory of the function
    pub path: PathBuf,
}

impl PciFunction {
    /// sysfs resource file of a BAR, for [`MmioRegion::open`]
    ///
    /// [`MmioRegion::open`]: crate::mmio::MmioRegion::open
    pub fn resource_path(&self, bar: Bar) -> PathBuf {
        self.path.join(bar.resource_file())
    }
}

/// Scan [`SYSFS_PCI_DEVICES`] for AMC525 cards
///
/// # Errors
///
/// Returns `Amc525Error::Mapping` if sysfs cannot be read.
pub fn scan() -> Result<Vec<PciFunction>> {
    scan_in(Path::new(SYSFS_PCI_DEVICES))
}

/// Scan a sysfs-style PCI device directory for AMC525 cards
///
/// Functions whose `vendor` or `device` file is missing or unreadable are
/// skipped. Results are sorted by bus address.
///
/// # Errors
///
/// Returns `Amc525Error::Mapping` if `root` cannot be read.
pub fn scan_in(root: &Path) -> Result<Vec<PciFunction>> {
    tracing::debug!("Scanning {} for AMC525 cards", root.display());

    let entries = std::fs::read_dir(root)
        .map_err(|e| Amc525Error::mapping(format!("Cannot read {}: {e}", root.display())))?;

    let mut found: Vec<_> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            let vendor = read_hex_sysfs(&path.join("vendor"))?;
            let device = read_hex_sysfs(&path.join("device"))?;
            is_amc525(vendor, device).then(|| PciFunction {
                address: entry.file_name().to_string_lossy().into_owned(),
                path,
            })
        })
        .collect();
    found.sort_by(|a, b| a.address.cmp(&b.address));

    tracing::info!("Found {} AMC525 card(s)", found.len());
    Ok(found)
}

/// Parse a sysfs ID file such as `0x10ee\n`.
fn read_hex_sysfs(path: &Path) -> Option<u16> {
    let content = std::fs::read_to_string(path).ok()?;
    let trimmed = content.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    u16::from_str_radix(digits, 16).ok()
}
