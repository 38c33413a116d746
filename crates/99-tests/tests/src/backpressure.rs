use dma_engine::{Descriptor, Direction, DmaEngine, EngineConfig};
use pcie_transport::{CreditCounts, LinkConfig, PcieLink};

use crate::harness::{engine, link_config, pattern, random_stalls, run_engine};

/// Eight 700-byte reads from scattered host addresses, then written back.
fn copy_workload(link: &mut PcieLink, engine: &mut DmaEngine) -> (Vec<u8>, u64) {
    let src: Vec<u8> = pattern(8 * 1024, 0x42);
    link.host_mut().write(0, &src).unwrap();

    let reads: Vec<Descriptor> = (0..8u16)
        .map(|i| Descriptor::read(u64::from(i) * 1024 + 3, u64::from(i) * 700, 700, i))
        .collect();
    let (statuses, read_cycles) = run_engine(engine, link, &reads, 200_000);
    assert_eq!(statuses.len(), 8);
    assert!(statuses.iter().all(|s| s.is_ok()));

    let writes = [Descriptor::write(0x8000, 0, 8 * 700, 0x80)];
    let (statuses, write_cycles) = run_engine(engine, link, &writes, 200_000);
    assert!(statuses[0].is_ok());

    let out = link.host().read_vec(0x8000, 8 * 700).unwrap();
    (out, read_cycles + write_cycles)
}

fn expected() -> Vec<u8> {
    let src = pattern(8 * 1024, 0x42);
    (0..8usize)
        .flat_map(|i| src[i * 1024 + 3..i * 1024 + 3 + 700].to_vec())
        .collect()
}

#[test]
fn random_stalls_change_latency_not_data() {
    let mut calm = PcieLink::new(link_config()).unwrap();
    let (calm_out, calm_cycles) = copy_workload(&mut calm, &mut engine());

    let mut stalled = PcieLink::new(link_config()).unwrap();
    stalled.set_pause_generator(Some(random_stalls(0xB0B, 0.5)));
    let (stalled_out, stalled_cycles) = copy_workload(&mut stalled, &mut engine());

    assert_eq!(calm_out, expected());
    assert_eq!(stalled_out, calm_out);
    assert!(stalled_cycles > calm_cycles, "{stalled_cycles} <= {calm_cycles}");
    assert!(stalled.metrics().paused_cycles > 0);
}

#[test]
fn periodic_stall_pattern() {
    let mut link = PcieLink::new(link_config()).unwrap();
    link.set_pause_generator(Some(Box::new([true, true, true, false].into_iter().cycle())));
    let (out, _) = copy_workload(&mut link, &mut engine());
    assert_eq!(out, expected());
}

#[test]
fn reordered_completions_land_in_place() {
    for seed in [1u64, 2, 3, 0xDEAD] {
        let mut link = PcieLink::new(LinkConfig {
            reorder: true,
            seed,
            ..link_config()
        })
        .unwrap();
        let (out, _) = copy_workload(&mut link, &mut engine());
        assert_eq!(out, expected(), "seed {seed:#x}");
    }
}

#[test]
fn starved_credits_throttle_but_finish() {
    let mut link = PcieLink::new(LinkConfig {
        non_posted_credits: CreditCounts::new(1, 0),
        posted_credits: CreditCounts::new(1, 16),
        credit_return_latency: 20,
        ..link_config()
    })
    .unwrap();
    let mut engine = DmaEngine::new(EngineConfig::default()).unwrap();
    let (out, _) = copy_workload(&mut link, &mut engine);
    assert_eq!(out, expected());
    let stats = engine.stats();
    let stalls = |dir| {
        stats.get(dma_engine::Counter::Dma(
            dir,
            dma_engine::DmaCounter::StallCredit,
        ))
    };
    assert!(stalls(Direction::Read) > 0);
    assert!(stalls(Direction::Write) > 0);
}

#[test]
fn combined_stalls_and_reorder() {
    let mut link = PcieLink::new(LinkConfig {
        reorder: true,
        seed: 99,
        ..link_config()
    })
    .unwrap();
    link.set_pause_generator(Some(random_stalls(7, 0.3)));
    let (out, _) = copy_workload(&mut link, &mut engine());
    assert_eq!(out, expected());
}
