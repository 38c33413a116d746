use dma_bench::checks::verify_counters;
use dma_bench::{sweep_points, SequencerConfig};
use dma_engine::Direction;

use crate::harness::{driver_on, link, pattern, random_stalls};

#[test]
fn identical_runs_are_repeatable() {
    let mut outputs = Vec::new();
    for _ in 0..2 {
        let mut drv = driver_on(link());
        let ram = pattern(0x4000, 0xE1);
        drv.device_mut().engine_mut().ram_mut().write(0, &ram).unwrap();
        let pcie = SequencerConfig::new(0x4000, 0x30, 0x1FFF, 0x1C0);
        let ram_win = SequencerConfig::new(0, 0x10, 0x3FFF, 0x240);
        drv.block_run(Direction::Write, pcie, ram_win, 0x90, 64).unwrap();
        outputs.push(drv.device().link().host().read_vec(0x4000, 0x2090).unwrap());
    }
    assert_eq!(outputs[0], outputs[1]);
}

#[test]
fn back_to_back_runs_restart_from_programmed_offsets() {
    let mut drv = driver_on(link());
    let pcie = SequencerConfig::new(0, 0x40, 0xFFF, 0x80);
    let ram = SequencerConfig::new(0x8000, 0, 0xFFF, 0x80);

    let before = drv.device().stats().snapshot();
    let first = drv.block_run(Direction::Read, pcie, ram, 0x80, 100).unwrap();
    let second = drv.block_run(Direction::Read, pcie, ram, 0x80, 100).unwrap();
    let delta = drv.device().stats().snapshot().delta(&before);

    verify_counters(&delta, Direction::Read, 200, 200 * 0x80).unwrap();
    assert!(first > 0 && second > 0);
    assert_eq!(
        drv.device().runner(Direction::Read).config().pcie.offset,
        pcie.address_of(100) - pcie.base
    );
}

#[test]
fn stalled_link_only_stretches_block_runs() {
    let mut calm = driver_on(link());
    let calm_report = calm.block_bench(Direction::Read, 256, 512, 200).unwrap();

    let mut stalled_link = link();
    stalled_link.set_pause_generator(Some(random_stalls(11, 0.4)));
    let mut stalled = driver_on(stalled_link);
    let stalled_report = stalled.block_bench(Direction::Read, 256, 512, 200).unwrap();

    assert_eq!(calm_report.ops, stalled_report.ops);
    assert_eq!(calm_report.requests, stalled_report.requests);
    assert!(stalled_report.cycles > calm_report.cycles);
    assert!(stalled_report.mbps() < calm_report.mbps());
}

#[test]
fn read_and_write_runs_overlap() {
    let mut drv = driver_on(link());
    let base = dma_bench::regs::RD_BLOCK_BASE;
    let dev = drv.device_mut();
    dev.runner_mut(Direction::Read).set_config(dma_bench::BlockConfig {
        pcie: SequencerConfig::new(0, 0, 0xFFF, 0x100),
        ram: SequencerConfig::new(0, 0, 0xFFF, 0x100),
        block_len: 0x100,
        block_count: 50,
    });
    dev.runner_mut(Direction::Write).set_config(dma_bench::BlockConfig {
        pcie: SequencerConfig::new(0x8000, 0, 0xFFF, 0x100),
        ram: SequencerConfig::new(0x4000, 0, 0xFFF, 0x100),
        block_len: 0x100,
        block_count: 50,
    });
    dev.write_reg(base + dma_bench::regs::BLOCK_CTRL, 1).unwrap();
    dev.write_reg(dma_bench::regs::WR_BLOCK_BASE + dma_bench::regs::BLOCK_CTRL, 1)
        .unwrap();
    assert!(dev.runner(Direction::Read).is_busy() && dev.runner(Direction::Write).is_busy());
    dev.run_until("both runs", 100_000, |d| d.is_idle()).unwrap();

    assert_eq!(dev.runner(Direction::Read).summary().completed, 50);
    assert_eq!(dev.runner(Direction::Write).summary().completed, 50);
}

#[test]
#[ignore]
fn slow_full_probe_sweep() {
    let mut drv = driver_on(link());
    drv.self_test().unwrap();
    for direction in [Direction::Read, Direction::Write] {
        let reports = drv.sweep(direction, dma_bench::SWEEP_MAX_SIZE, 200).unwrap();
        assert_eq!(reports.len(), sweep_points(dma_bench::SWEEP_MAX_SIZE).len());
        for report in reports {
            assert_eq!(report.ops, 200, "{report}");
            assert!(report.mbps() > 0, "{report}");
        }
    }
}
