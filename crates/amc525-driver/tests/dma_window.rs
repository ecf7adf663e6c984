//! DMA window reads through a shared controller

use amc525_driver::{
    Amc525Error, DmaController, DmaEngine, DmaWindow, IoError, MemoryDmaEngine, ResourceError,
};
use std::io::SeekFrom;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

const REGION: u64 = 0x400;

/// Two regions: the first filled with 0xAA, the second with 0x55
fn controller(granularity: usize) -> Arc<DmaController> {
    let mut memory = vec![0xaa; REGION as usize];
    memory.extend(std::iter::repeat(0x55).take(REGION as usize));
    Arc::new(DmaController::new(MemoryDmaEngine::new(memory, granularity)))
}

#[test]
fn test_read_at_end_returns_nothing_and_rewinds() {
    let mut window = DmaWindow::open(controller(64), 0, REGION);
    window.seek(SeekFrom::Start(REGION)).unwrap();

    let mut buf = [0u8; 16];
    assert_eq!(window.read(&mut buf).unwrap(), 0);
    assert_eq!(window.position(), 0);
    assert_eq!(window.read(&mut buf).unwrap(), 16);
}

#[test]
fn test_read_past_end_clipped() {
    let mut window = DmaWindow::open(controller(64), 0, REGION);
    window.seek(SeekFrom::End(-10)).unwrap();

    let mut buf = [0u8; 32];
    assert_eq!(window.read(&mut buf).unwrap(), 10);
    assert_eq!(window.position(), 0);
}

#[test]
fn test_seek_outside_window_rejected() {
    let mut window = DmaWindow::open(controller(64), 0, REGION);
    assert!(matches!(
        window.seek(SeekFrom::Start(REGION + 1)),
        Err(IoError::OutOfRange { .. })
    ));
    assert!(window.seek(SeekFrom::Current(-1)).is_err());

    let err = std::io::Seek::seek(&mut window, SeekFrom::End(1)).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
}

#[test]
fn test_full_region_in_granularity_chunks() {
    let mut window = DmaWindow::open(controller(100), REGION, REGION);
    let mut chunks = Vec::new();
    let mut total = 0u64;
    let mut buf = [0u8; 256];

    while total < REGION {
        let n = window.read(&mut buf).unwrap();
        assert!(buf[..n].iter().all(|&b| b == 0x55));
        chunks.push(n);
        total += n as u64;
    }

    assert_eq!(total, REGION);
    assert!(chunks.iter().all(|&n| n <= 100));
    assert_eq!(chunks.last(), Some(&24));
}

#[test]
fn test_engine_shortfall_is_copy_failure() {
    // Window runs beyond the memory the engine can reach
    let mut window = DmaWindow::open(controller(64), REGION, REGION * 2);
    window.seek(SeekFrom::Start(REGION)).unwrap();
    let mut buf = [0u8; 8];
    assert!(matches!(
        window.read(&mut buf),
        Err(IoError::CopyFailed { requested: 8 })
    ));
}

#[test]
fn test_engine_error_is_transfer_failure() {
    let mut window = DmaWindow::open(controller(64), 0x10_0000, 16);
    let mut buf = [0u8; 8];
    assert!(matches!(
        window.read(&mut buf),
        Err(IoError::Transfer { .. })
    ));
    assert_eq!(window.position(), 0);
}

#[test]
fn test_concurrent_reads_never_interleave() {
    let controller = controller(37);

    let readers: Vec<_> = [(0u64, 0xaau8), (REGION, 0x55u8)]
        .into_iter()
        .flat_map(|(base, fill)| {
            let controller = Arc::clone(&controller);
            (0..3).map(move |_| {
                let mut window = DmaWindow::open(Arc::clone(&controller), base, REGION);
                thread::spawn(move || {
                    let mut buf = [0u8; 64];
                    for _ in 0..500 {
                        let n = window.read(&mut buf).unwrap();
                        assert!(
                            buf[..n].iter().all(|&b| b == fill),
                            "read from {base:#x} saw foreign bytes"
                        );
                    }
                })
            })
        })
        .collect();

    for reader in readers {
        reader.join().unwrap();
    }
}

/// Engine that flags any overlap between two stagings
#[derive(Debug)]
struct OverlapDetector {
    busy: Arc<AtomicBool>,
    staging: Vec<u8>,
}

impl DmaEngine for OverlapDetector {
    fn buffer_size(&self) -> usize {
        8
    }

    fn stage(&mut self, _address: u64, len: usize) -> std::io::Result<usize> {
        assert!(!self.busy.swap(true, Ordering::AcqRel), "overlapping stage");
        thread::yield_now();
        self.staging = vec![0; len.min(8)];
        self.busy.store(false, Ordering::Release);
        Ok(self.staging.len())
    }

    fn staged(&self) -> &[u8] {
        &self.staging
    }
}

#[test]
fn test_lease_excludes_other_readers() {
    let controller = Arc::new(DmaController::new(OverlapDetector {
        busy: Arc::new(AtomicBool::new(false)),
        staging: Vec::new(),
    }));

    let lease = controller.lease(0, 8).unwrap();
    assert_eq!(lease.len(), 8);
    assert!(matches!(
        controller.try_lease(0, 8),
        Err(Amc525Error::Resource(ResourceError::LeaseBusy))
    ));

    let waiter = {
        let controller = Arc::clone(&controller);
        thread::spawn(move || DmaWindow::open(controller, 0, 64).read(&mut [0u8; 4]).unwrap())
    };
    drop(lease);
    assert_eq!(waiter.join().unwrap(), 4);
}
