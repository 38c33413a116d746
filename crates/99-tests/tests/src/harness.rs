//! Shared builders for the scenario suite.

use dma_bench::{BenchDriver, DmaBenchDevice, DriverConfig};
use dma_engine::{DescStatus, Descriptor, DmaEngine, EngineConfig};
use pcie_transport::{LinkConfig, PcieLink, Transport};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const HOST_SIZE: usize = 64 * 1024;

pub fn link_config() -> LinkConfig {
    LinkConfig {
        host_size: HOST_SIZE,
        ..LinkConfig::default()
    }
}

pub fn link() -> PcieLink {
    PcieLink::new(link_config()).unwrap()
}

pub fn engine() -> DmaEngine {
    DmaEngine::new(EngineConfig::default()).unwrap()
}

pub fn driver_on(link: PcieLink) -> BenchDriver<PcieLink> {
    let device = DmaBenchDevice::new(link, EngineConfig::default()).unwrap();
    let mut driver = BenchDriver::new(device, DriverConfig::default());
    driver.enable().unwrap();
    driver
}

/// Pause generator stalling each cycle with probability `p`.
pub fn random_stalls(seed: u64, p: f64) -> pcie_transport::PauseGenerator {
    let mut rng = StdRng::seed_from_u64(seed);
    Box::new(std::iter::from_fn(move || Some(rng.gen_bool(p))))
}

/// Deterministic fill pattern.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// Submits every descriptor, then ticks until the engine is idle.
/// Returns the statuses in retirement order and the cycles spent.
pub fn run_engine<T: Transport>(
    engine: &mut DmaEngine,
    link: &mut T,
    descs: &[Descriptor],
    max_cycles: u64,
) -> (Vec<DescStatus>, u64) {
    let mut pending: Vec<Descriptor> = descs.iter().rev().copied().collect();
    let mut statuses = Vec::new();
    for cycle in 0..max_cycles {
        while let Some(desc) = pending.last().copied() {
            match engine.submit(desc) {
                Err(err) if err.is_retryable() => break,
                _ => {
                    pending.pop();
                }
            }
        }
        link.tick();
        engine.tick(link);
        while let Some(status) = engine.pop_status() {
            statuses.push(status);
        }
        if pending.is_empty() && engine.is_idle() {
            return (statuses, cycle + 1);
        }
    }
    panic!("engine still busy after {max_cycles} cycles");
}
