//! PCIe identifiers and board limits.

/// Xilinx vendor ID (PCI-SIG assigned).
pub const XILINX_VENDOR_ID: u16 = 0x10EE;

/// AMC525 device ID as programmed into the FPGA PCIe core (`lspci: 10ee:7038`).
pub const AMC525_DEVICE_ID: u16 = 0x7038;

/// Name used for the driver and as the prefix of every endpoint node.
pub const DEVICE_NAME: &str = "amc525_lamc_priv";

/// Default number of boards a single driver instance will number.
pub const DEFAULT_MAX_BOARDS: usize = 4;

/// Hard ceiling on board numbers (width of the allocation bitmap).
pub const MAX_BOARDS_LIMIT: usize = 32;

/// Format a `vendor:device` string for use with `lspci -d`.
#[must_use]
pub fn lspci_filter() -> String {
    format!("{XILINX_VENDOR_ID:04x}:{AMC525_DEVICE_ID:04x}")
}

/// Returns true when a PCI vendor/device pair is an AMC525.
#[must_use]
pub const fn is_amc525(vendor: u16, device: u16) -> bool {
    vendor == XILINX_VENDOR_ID && device == AMC525_DEVICE_ID
}

/// Name of an endpoint node: `<device>.<board>.<endpoint>`.
#[must_use]
pub fn endpoint_node_name(device: &str, board: usize, endpoint: &str) -> String {
    format!("{device}.{board}.{endpoint}")
}
