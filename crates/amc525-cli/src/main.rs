//! `amc525`: command-line interface for AMC525 cards and PROM images.
//!
//! ```text
//! USAGE:
//!   amc525 probe                       List AMC525 cards on the PCI bus
//!   amc525 prom <file>                 Decode a PROM image
//!   amc525 endpoints <file>            Endpoints a board with this PROM gets
//!   amc525 read --prom <file> --memory <file> --region <name>
//!                                      Hexdump a DMA region of a memory image
//!   amc525 reg <resource> <offset> [value]
//!                                      Peek/poke a register window
//! ```

use amc525_chip::bar::Bar;
use amc525_driver::discovery::{self, SYSFS_PCI_DEVICES};
use amc525_driver::{
    Amc525Device, AttachParams, BoardRegistry, DmaWindow, DriverConfig, MemoryDmaEngine,
    MemoryRegisters, MmioRegion, PromContext, RegisterAccess,
};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Register window size given to boards attached from files
const PLACEHOLDER_REGISTERS: usize = 0x1000;

#[derive(Parser)]
#[command(name = "amc525", about = "AMC525 FPGA card CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// List AMC525 cards found in sysfs.
    Probe {
        /// sysfs PCI device directory to scan.
        #[arg(long, default_value = SYSFS_PCI_DEVICES)]
        sysfs: PathBuf,
    },
    /// Decode and print every entry of a PROM image.
    Prom {
        /// PROM image file.
        file: PathBuf,
    },
    /// List the endpoints a board with this PROM would expose.
    Endpoints {
        /// PROM image file.
        file: PathBuf,
    },
    /// Read a DMA region of a memory image through a DMA window.
    Read {
        /// PROM image file.
        #[arg(long)]
        prom: PathBuf,
        /// Card memory image file.
        #[arg(long)]
        memory: PathBuf,
        /// Card address of the first byte of the memory image.
        #[arg(long, default_value = "0", value_parser = parse_number)]
        memory_base: u64,
        /// DMA region name as listed in the PROM (e.g. memA).
        #[arg(long)]
        region: String,
        /// Byte offset into the region.
        #[arg(long, default_value = "0", value_parser = parse_number)]
        offset: u64,
        /// Bytes to read (default: to the end of the region).
        #[arg(long, value_parser = parse_number)]
        count: Option<u64>,
        /// DMA staging buffer size.
        #[arg(long, default_value_t = MemoryDmaEngine::DEFAULT_BUFFER_SIZE)]
        granularity: usize,
    },
    /// Read or write one 32-bit register of a mapped register window.
    Reg {
        /// Register window: a resource file, or a PCI address to map BAR0 of.
        target: String,
        /// Register byte offset.
        #[arg(value_parser = parse_number)]
        offset: u64,
        /// Value to write; reads when omitted.
        #[arg(value_parser = parse_number)]
        value: Option<u64>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Probe { sysfs } => cmd_probe(&sysfs)?,
        Cmd::Prom { file } => cmd_prom(&file)?,
        Cmd::Endpoints { file } => cmd_endpoints(&file)?,
        Cmd::Read {
            prom,
            memory,
            memory_base,
            region,
            offset,
            count,
            granularity,
        } => {
            let dump = cmd_read(&ReadRequest {
                prom: &prom,
                memory: &memory,
                memory_base,
                region: &region,
                offset,
                count,
                granularity,
            })?;
            print!("{dump}");
        }
        Cmd::Reg {
            target,
            offset,
            value,
        } => cmd_reg(&target, offset, value)?,
    }

    Ok(())
}

/// Parse decimal or `0x`-prefixed hexadecimal.
fn parse_number(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => s.replace('_', "").parse(),
    };
    parsed.map_err(|e| format!("invalid number {s:?}: {e}"))
}

fn load_prom(path: &Path) -> Result<PromContext> {
    let blob = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    PromContext::load(&blob).with_context(|| format!("decoding PROM {}", path.display()))
}

/// Attach a board from files, with a placeholder register window.
fn attach_from_files(prom: &Path, dma: MemoryDmaEngine) -> Result<Amc525Device> {
    let blob = std::fs::read(prom).with_context(|| format!("reading {}", prom.display()))?;
    let registry = BoardRegistry::new(DriverConfig::from_env()?)?;
    let device = Amc525Device::attach(
        &registry,
        AttachParams {
            prom: blob.into(),
            registers: Arc::new(MemoryRegisters::new(PLACEHOLDER_REGISTERS)),
            dma: Box::new(dma),
        },
    )
    .with_context(|| format!("attaching board with PROM {}", prom.display()))?;
    tracing::debug!("Attached board {} from {}", device.board(), prom.display());
    Ok(device)
}

fn cmd_probe(sysfs: &Path) -> Result<()> {
    let cards = discovery::scan_in(sysfs)?;

    println!(
        "AMC525 cards ({}): {}",
        amc525_driver::pcie_ids::lspci_filter(),
        cards.len()
    );
    for (index, card) in cards.iter().enumerate() {
        println!(
            "[{index}] {}  registers: {}",
            card.address,
            card.resource_path(Bar::Registers).display()
        );
    }

    Ok(())
}

fn cmd_prom(file: &Path) -> Result<()> {
    let prom = load_prom(file)?;

    println!("PROM         : {}", file.display());
    println!("Data length  : {} bytes", prom.data_len());
    println!("Entries      : {}", prom.entry_count());
    println!();

    let mut dma_index = 0;
    for entry in prom.entries() {
        let label = if entry.as_dma().is_some() {
            dma_index += 1;
            format!("dma {dma_index}")
        } else {
            "     ".to_string()
        };
        println!("{:#06x}  {label:<6} {entry}", entry.offset());
    }

    Ok(())
}

fn cmd_endpoints(file: &Path) -> Result<()> {
    let device = attach_from_files(file, MemoryDmaEngine::new(Vec::new(), 1))?;

    for endpoint in device.endpoints() {
        println!("{}", endpoint.name());
    }

    device.detach();
    Ok(())
}

/// Arguments of the `read` subcommand.
struct ReadRequest<'a> {
    prom: &'a Path,
    memory: &'a Path,
    memory_base: u64,
    region: &'a str,
    offset: u64,
    count: Option<u64>,
    granularity: usize,
}

fn cmd_read(req: &ReadRequest<'_>) -> Result<String> {
    let image =
        std::fs::read(req.memory).with_context(|| format!("reading {}", req.memory.display()))?;
    let engine = MemoryDmaEngine::with_base(image, req.memory_base, req.granularity);
    let device = attach_from_files(req.prom, engine)?;

    let index = device
        .prom()
        .dma_entries()
        .position(|e| e.name_str() == req.region)
        .with_context(|| format!("no DMA region named {:?}", req.region))?;
    let mut window = device.open_dma_index(index + 1)?;

    let data = read_window(&mut window, req.offset, req.count)?;
    Ok(hexdump(window.base() + req.offset, &data))
}

/// Read `count` bytes (or up to the end) starting at `offset`.
fn read_window(window: &mut DmaWindow, offset: u64, count: Option<u64>) -> Result<Vec<u8>> {
    window
        .seek(SeekFrom::Start(offset))
        .with_context(|| format!("seeking to {offset:#x}"))?;

    let available = window.region_size() - offset;
    let wanted = count.map_or(available, |c| c.min(available));
    let wanted = usize::try_from(wanted).context("region too large to read into memory")?;

    let mut data = vec![0u8; wanted];
    let mut filled = 0;
    while filled < wanted {
        let n = window
            .read(&mut data[filled..])
            .with_context(|| format!("reading at {:#x}", offset + filled as u64))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    data.truncate(filled);
    Ok(data)
}

/// Classic 16-bytes-per-line hexdump.
fn hexdump(address: u64, data: &[u8]) -> String {
    let mut out = String::new();
    for (line, chunk) in data.chunks(16).enumerate() {
        let hex: Vec<_> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        let ascii: String = chunk
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { char::from(b) } else { '.' })
            .collect();
        out.push_str(&format!(
            "{:012x}  {:<47}  |{ascii}|\n",
            address + line as u64 * 16,
            hex.join(" ")
        ));
    }
    out
}

fn cmd_reg(target: &str, offset: u64, value: Option<u64>) -> Result<()> {
    let region = if Path::new(target).exists() {
        MmioRegion::open(target)?
    } else {
        MmioRegion::map_bar(target, Bar::Registers)?
    };

    let offset = usize::try_from(offset).context("offset too large")?;
    match value {
        Some(value) => {
            let Ok(value) = u32::try_from(value) else {
                bail!("value {value:#x} does not fit in 32 bits");
            };
            region.write32(offset, value)?;
            println!("{offset:#06x} <- {value:#010x}");
        }
        None => println!("{offset:#06x} = {:#010x}", region.read32(offset)?),
    }

    Ok(())
}
