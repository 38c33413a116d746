use dma_bench::{BenchError, DmaBenchDevice, ErrorMonitors};
use dma_engine::{Descriptor, Direction, EngineConfig, ErrorKind};
use pcie_transport::CplStatus;

use crate::harness::{driver_on, engine, link, pattern, run_engine};

#[test]
fn failing_read_retires_alone() {
    let mut link = link();
    let mut engine = engine();
    let data = pattern(0x4000, 0x10);
    link.host_mut().write(0, &data).unwrap();
    link.inject_fault(0x2000, 0x100, CplStatus::CompleterAbort);

    let descs = [
        Descriptor::read(0x1000, 0x0000, 0x800, 1),
        Descriptor::read(0x1F80, 0x1000, 0x800, 2),
        Descriptor::read(0x3000, 0x2000, 0x800, 3),
    ];
    let (statuses, _) = run_engine(&mut engine, &mut link, &descs, 50_000);
    assert_eq!(statuses.len(), 3);

    for status in &statuses {
        match status.tag {
            2 => assert_eq!(status.error, Some(ErrorKind::CompleterAbort)),
            _ => assert!(status.is_ok(), "tag {} failed: {:?}", status.tag, status.error),
        }
    }
    let ram = engine.ram();
    assert_eq!(ram.read_vec(0, 0x800).unwrap(), &data[0x1000..0x1800]);
    assert_eq!(ram.read_vec(0x2000, 0x800).unwrap(), &data[0x3000..0x3800]);
    assert_eq!(engine.table().live(), 0, "failed slot recycled");
}

#[test]
fn poisoned_and_unsupported_completions_are_distinguished() {
    let mut link = link();
    let mut engine = engine();
    link.inject_fault(0x500, 0x10, CplStatus::Poisoned);
    let descs = [
        Descriptor::read(0x500, 0, 0x10, 1),
        Descriptor::read(0x10_0000, 0x100, 0x10, 2),
    ];
    let (statuses, _) = run_engine(&mut engine, &mut link, &descs, 10_000);
    let error_of = |tag| statuses.iter().find(|s| s.tag == tag).and_then(|s| s.error);
    assert_eq!(error_of(1), Some(ErrorKind::Poisoned));
    assert_eq!(error_of(2), Some(ErrorKind::UnsupportedRequest));
}

#[test]
fn rejected_write_reports_and_following_work_proceeds() {
    let mut link = link();
    let mut engine = engine();
    engine.ram_mut().write(0, &pattern(0x200, 0x99)).unwrap();
    link.inject_fault(0x6000, 0x1000, CplStatus::CompleterAbort);

    let descs = [
        Descriptor::write(0x6000, 0, 0x200, 1),
        Descriptor::write(0x9000, 0, 0x200, 2),
    ];
    let (statuses, _) = run_engine(&mut engine, &mut link, &descs, 10_000);
    let error_of = |tag| statuses.iter().find(|s| s.tag == tag).and_then(|s| s.error);
    assert_eq!(error_of(1), Some(ErrorKind::Rejected));
    assert_eq!(error_of(2), None);
    assert_eq!(
        link.host().read_vec(0x9000, 0x200).unwrap(),
        pattern(0x200, 0x99)
    );
    assert_eq!(link.host().read_vec(0x6000, 0x200).unwrap(), vec![0; 0x200]);
}

#[test]
fn driver_surfaces_transfer_errors_and_monitors() {
    let mut link = link();
    link.inject_fault(0x4000, 0x100, CplStatus::CompleterAbort);
    let mut drv = driver_on(link);

    let err = drv.dma_read(0x4000, 0, 0x40).unwrap_err();
    let BenchError::Transfer { status } = err else {
        panic!("unexpected error {err:?}");
    };
    assert_eq!(
        dma_engine::decode_status(status).1,
        Some(ErrorKind::CompleterAbort)
    );

    drv.dma_read(0x20_0000, 0, 0x40).unwrap_err();
    assert_eq!(
        drv.device().error_monitors(),
        ErrorMonitors {
            correctable: 1,
            uncorrectable: 1,
        }
    );

    // The channel is still usable.
    drv.dma_read(0x100, 0, 0x40).unwrap();
    let stats = drv.device().stats();
    assert_eq!(
        stats.get(dma_engine::Counter::Dma(Direction::Read, dma_engine::DmaCounter::OpError)),
        2
    );
}

#[test]
fn malformed_descriptors_never_touch_the_link() {
    let mut dev = DmaBenchDevice::new(link(), EngineConfig::default()).unwrap();
    dev.engine_mut()
        .submit(Descriptor::read(0, 0xFFFF_0000, 0x100, 4))
        .unwrap_err();
    dev.engine_mut()
        .submit(Descriptor::immediate(0, 1, 8, 5))
        .unwrap_err();
    for _ in 0..100 {
        dev.tick();
    }
    assert_eq!(dev.link().metrics().reads, 0);
    assert_eq!(dev.link().metrics().writes, 0);
    assert_eq!(dev.status(Direction::Read) & 0xFF, 4);
    assert_eq!(dev.status(Direction::Write) & 0xFF, 5);
    assert_eq!(dev.error_monitors(), ErrorMonitors::default());
}
