//! PCIe BAR layout of the AMC525 firmware.
//!
//! ```text
//! BAR  Purpose
//! ──── ─────────────────────────────────────────────────────
//!  0   FPGA register window, exposed raw through the `reg` endpoint
//!  2   DMA controller registers (staging buffer, descriptors)
//! ```

/// BAR index enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Bar {
    /// BAR0: FPGA register window.
    Registers = 0,
    /// BAR2: DMA controller.
    DmaControl = 2,
}

impl Bar {
    /// BAR number as used in sysfs `resourceN` file names.
    #[must_use]
    pub const fn index(self) -> u32 {
        self as u32
    }

    /// Name of the sysfs resource file for this BAR.
    #[must_use]
    pub fn resource_file(self) -> String {
        format!("resource{}", self.index())
    }
}
