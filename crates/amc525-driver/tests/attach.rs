//! Device attach, endpoint table, detach and unwinding

use amc525_driver::prom::PromBuilder;
use amc525_driver::{
    Amc525Device, Amc525Error, AttachParams, BoardRegistry, DmaPermissions, DriverConfig,
    EndpointKind, MemoryDmaEngine, MemoryRegisters, MmioRegion, ParseError, ResourceError,
};
use bytes::Bytes;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn scenario_prom() -> Bytes {
    PromBuilder::new()
        .device("test_dev")
        .dma("memA", 0, 0x1213_1415, DmaPermissions::READ)
        .dma("memB", 0xabcd_1122_3344, 0x0891_2345, DmaPermissions::WRITE)
        .dma("memC", 0x4261_6263, 0x100, DmaPermissions::READ | DmaPermissions::WRITE)
        .finish()
}

fn params(prom: Bytes) -> AttachParams {
    AttachParams {
        prom,
        registers: Arc::new(MemoryRegisters::new(0x1000)),
        dma: Box::new(MemoryDmaEngine::new(vec![0; 0x100], 0x40)),
    }
}

fn registry(max_boards: usize) -> Arc<BoardRegistry> {
    BoardRegistry::new(DriverConfig {
        device_name: "lmbf".to_string(),
        max_boards,
    })
    .unwrap()
}

#[test]
fn test_scenario_endpoints() {
    let registry = registry(4);
    let device = Amc525Device::attach(&registry, params(scenario_prom())).unwrap();

    let endpoints: Vec<_> = device
        .endpoints()
        .iter()
        .map(|e| (e.name(), e.kind()))
        .collect();
    assert_eq!(
        endpoints,
        [
            ("lmbf.0.reg", EndpointKind::Registers),
            ("lmbf.0.memA", EndpointKind::Dma { index: 1 }),
            ("lmbf.0.memB", EndpointKind::Dma { index: 2 }),
            ("lmbf.0.memC", EndpointKind::Dma { index: 3 }),
        ]
    );

    let window = device.open_dma("lmbf.0.memB").unwrap();
    assert_eq!(window.base(), 0xabcd_1122_3344);
    assert_eq!(window.region_size(), 0x0891_2345);
    assert_eq!(window.transfer_granularity(), 0x40);
    assert_eq!(device.prom().device().unwrap().name_str(), "test_dev");
}

#[test]
fn test_boards_numbered_independently() {
    let registry = registry(2);
    let first = Amc525Device::attach(&registry, params(scenario_prom())).unwrap();
    let second = Amc525Device::attach(&registry, params(scenario_prom())).unwrap();
    assert_eq!(second.endpoints()[0].name(), "lmbf.1.reg");

    let err = Amc525Device::attach(&registry, params(scenario_prom())).unwrap_err();
    assert!(matches!(
        err,
        Amc525Error::Attach {
            stage: "claiming board number",
            ..
        }
    ));

    first.detach();
    let third = Amc525Device::attach(&registry, params(scenario_prom())).unwrap();
    assert_eq!(third.board(), 0);
    drop(second);
    assert_eq!(registry.claimed_count(), 1);
}

#[test]
fn test_corrupt_prom_unwinds() {
    let registry = registry(1);
    let mut blob = scenario_prom().to_vec();
    blob[10] = 0x42;

    let err = Amc525Device::attach(&registry, params(Bytes::from(blob))).unwrap_err();
    match err {
        Amc525Error::Attach { stage, source } => {
            assert_eq!(stage, "loading PROM");
            assert!(matches!(
                *source,
                Amc525Error::Parse(ParseError::Corrupted { offset: 10, .. })
            ));
        }
        other => panic!("unexpected error: {other}"),
    }

    // The board number went back, so the single slot is usable again
    assert_eq!(registry.claimed_count(), 0);
    assert!(Amc525Device::attach(&registry, params(scenario_prom())).is_ok());
}

#[test]
fn test_empty_register_window_unwinds() {
    let registry = registry(1);
    let mut params = params(scenario_prom());
    params.registers = Arc::new(MemoryRegisters::new(0));

    assert!(matches!(
        Amc525Device::attach(&registry, params),
        Err(Amc525Error::Attach {
            stage: "mapping registers",
            ..
        })
    ));
    assert_eq!(registry.claimed_count(), 0);
}

#[test]
fn test_empty_dma_buffer_unwinds() {
    let registry = registry(1);
    let mut params = params(scenario_prom());
    params.dma = Box::new(MemoryDmaEngine::new(vec![0; 0x100], 0));

    assert!(matches!(
        Amc525Device::attach(&registry, params),
        Err(Amc525Error::Attach {
            stage: "starting DMA controller",
            ..
        })
    ));
    assert_eq!(registry.claimed_count(), 0);
}

#[test]
fn test_detach_wakes_blocked_reader() {
    let registry = registry(1);
    let device = Amc525Device::attach(&registry, params(scenario_prom())).unwrap();
    let reader = device.open_events().unwrap();

    let consumer = thread::spawn(move || reader.read(true));
    thread::sleep(Duration::from_millis(20));
    device.detach();

    assert_eq!(consumer.join().unwrap(), Err(ResourceError::Closed));
}

#[test]
fn test_window_outlives_detach() {
    let registry = registry(1);
    let device = Amc525Device::attach(&registry, params(scenario_prom())).unwrap();
    let mut window = device.open_dma("lmbf.0.memA").unwrap();
    device.detach();

    let mut buf = [0xffu8; 8];
    assert_eq!(window.read(&mut buf).unwrap(), 8);
    assert_eq!(buf, [0; 8]);
}

#[test]
fn test_interrupt_thread_feeds_readers() {
    let registry = registry(1);
    let device = Amc525Device::attach(&registry, params(scenario_prom())).unwrap();
    let readers: Vec<_> = (0..3).map(|_| device.open_events().unwrap()).collect();

    let pool = device.interrupt_pool();
    thread::spawn(move || pool.deliver(0x5)).join().unwrap();

    for reader in &readers {
        assert_eq!(reader.read(true), Ok(0x5));
    }
}

#[test]
fn test_mapped_register_window() {
    let file = tempfile::NamedTempFile::new().unwrap();
    file.as_file().set_len(0x1000).unwrap();

    let registry = registry(1);
    let mut params = params(scenario_prom());
    params.registers = Arc::new(MmioRegion::open(file.path()).unwrap());
    let device = Amc525Device::attach(&registry, params).unwrap();

    let regs = device.registers();
    assert_eq!(regs.size(), 0x1000);
    regs.write32(0xffc, 0x1234_5678).unwrap();
    assert_eq!(regs.read32(0xffc).unwrap(), 0x1234_5678);
    assert!(regs.check_map(0x1000, 1).is_err());
}
