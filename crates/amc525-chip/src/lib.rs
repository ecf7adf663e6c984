//! Wire model for the AMC525 FPGA MTCA card.
//!
//! This crate has **no dependencies** and **no hardware access**: it is a
//! pure description of what the card and its host driver agree on. PCI
//! identifiers, the BAR layout, the PROM descriptor format, and the query
//! codes understood by DMA-window endpoints.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`pcie`] | Vendor/device IDs, board limits, device name |
//! | [`bar`] | BAR layout (BAR0 registers, BAR2 DMA controller) |
//! | [`prom`] | PROM entry tags, sizes and field offsets |
//! | [`query`] | Query codes for DMA-window endpoints |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bar;
pub mod pcie;
pub mod prom;
pub mod query;

/// Number of independent interrupt event readers per board.
pub const N_EVENT_READERS: usize = 8;
