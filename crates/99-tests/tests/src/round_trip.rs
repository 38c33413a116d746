use dma_bench::checks::{verify_copy, verify_counters};
use dma_engine::{Direction, StatsSnapshot};
use proptest::prelude::*;

use crate::harness::{driver_on, link, pattern};

/// Host -> card RAM -> host at a second address; returns the bytes that came back.
fn round_trip(host_src: u64, ram: u64, host_dst: u64, data: &[u8]) -> (Vec<u8>, StatsSnapshot) {
    let mut drv = driver_on(link());
    drv.device_mut()
        .link_mut()
        .host_mut()
        .write(host_src, data)
        .unwrap();
    let before = drv.device().stats().snapshot();
    let len = data.len() as u32;
    drv.dma_read(host_src, ram, len).unwrap();
    drv.dma_write(host_dst, ram, len).unwrap();
    let delta = drv.device().stats().snapshot().delta(&before);
    let back = drv
        .device()
        .link()
        .host()
        .read_vec(host_dst, data.len())
        .unwrap();
    (back, delta)
}

const LENGTHS: [usize; 18] = [
    1, 2, 3, 4, 5, 127, 128, 129, 255, 256, 257, 511, 512, 513, 1000, 4096, 6000, 8192,
];

#[test]
fn sizes_from_one_byte_to_several_kib() {
    for (i, len) in LENGTHS.into_iter().enumerate() {
        let data = pattern(len, i as u8);
        let (back, delta) = round_trip(0x100, 0x40, 0x8000, &data);
        verify_copy(&data, &back).unwrap_or_else(|e| panic!("len {len}: {e}"));
        verify_counters(&delta, Direction::Read, 1, len as u64).unwrap();
        verify_counters(&delta, Direction::Write, 1, len as u64).unwrap();
    }
}

#[test]
fn unaligned_transfers_straddling_4k() {
    // Both directions cross a 4 KiB line at an odd offset.
    let data = pattern(300, 0x5A);
    let (back, delta) = round_trip(0x0F7F, 0x13, 0x2F81, &data);
    verify_copy(&data, &back).unwrap();
    let reqs = |dir| delta.get(dma_engine::Counter::Dma(dir, dma_engine::DmaCounter::ReqCount));
    assert_eq!(reqs(Direction::Read), 2, "read split at 0x1000");
    // 0x2F81..0x30AD: 127 bytes then 173 bytes.
    assert_eq!(reqs(Direction::Write), 2, "write split at 0x3000");
}

#[test]
fn multi_request_transfers_keep_byte_order() {
    let data = pattern(3 * 4096 + 17, 0x77);
    let (back, delta) = round_trip(0x3, 0x9, 0x4001, &data);
    verify_copy(&data, &back).unwrap();
    let reqs = |dir| delta.get(dma_engine::Counter::Dma(dir, dma_engine::DmaCounter::ReqCount));
    assert!(reqs(Direction::Read) >= 3 * 4096 / 512);
    assert!(reqs(Direction::Write) >= 3 * 4096 / 256);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn arbitrary_offsets_round_trip(
        len in 1usize..6000,
        src in 0u64..0x4000,
        ram in 0u64..0x4000,
        dst in 0x8000u64..0xC000,
        seed in any::<u8>(),
    ) {
        let data = pattern(len, seed);
        let (back, _) = round_trip(src, ram, dst, &data);
        prop_assert!(verify_copy(&data, &back).is_ok());
    }
}
