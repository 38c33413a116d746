use dma_engine::{decode_status, Counter, DmaCounter, Direction, ErrorKind, StatsSnapshot};

use crate::sequencer::SequencerConfig;

pub type CheckResult = Result<(), String>;

/// Byte-for-byte comparison, naming the first differing offset.
pub fn verify_copy(expected: &[u8], actual: &[u8]) -> CheckResult {
    if expected.len() != actual.len() {
        return Err(format!(
            "copied {} bytes (expected {})",
            actual.len(),
            expected.len()
        ));
    }
    if let Some(pos) = expected.iter().zip(actual).position(|(a, b)| a != b) {
        return Err(format!(
            "first mismatch at offset {pos:#x}: {:#04x} (expected {:#04x})",
            actual[pos], expected[pos]
        ));
    }
    Ok(())
}

/// Status register word for `tag` with the expected outcome.
pub fn verify_status(word: u32, tag: u8, error: Option<ErrorKind>) -> CheckResult {
    let (done, got_error, got_tag) = decode_status(word);
    if !done {
        return Err(format!("status {word:#010x} lacks the done bit"));
    }
    if got_tag != tag {
        return Err(format!("status carries tag {got_tag:#04x} (expected {tag:#04x})"));
    }
    if got_error != error {
        return Err(format!("status error {got_error:?} (expected {error:?})"));
    }
    Ok(())
}

/// Every address lies in the window and matches the closed-form sequence.
pub fn verify_block_addresses(config: &SequencerConfig, addrs: &[u64]) -> CheckResult {
    for (i, &addr) in addrs.iter().enumerate() {
        let expected = config.address_of(i as u64);
        if addr != expected {
            return Err(format!(
                "beat {i} addressed {addr:#x} (expected {expected:#x})"
            ));
        }
        let rel = addr.wrapping_sub(config.base);
        if rel & !config.mask != 0 {
            return Err(format!("beat {i} at {addr:#x} left the window"));
        }
    }
    Ok(())
}

/// Operation counters moved by exactly `ops` and `bytes`, with no errors.
pub fn verify_counters(
    delta: &StatsSnapshot,
    direction: Direction,
    ops: u64,
    bytes: u64,
) -> CheckResult {
    let get = |c| delta.get(Counter::Dma(direction, c));
    if get(DmaCounter::OpCount) != ops {
        return Err(format!(
            "{direction:?} op count moved by {} (expected {ops})",
            get(DmaCounter::OpCount)
        ));
    }
    if get(DmaCounter::OpBytes) != bytes {
        return Err(format!(
            "{direction:?} byte count moved by {} (expected {bytes})",
            get(DmaCounter::OpBytes)
        ));
    }
    if get(DmaCounter::OpError) != 0 {
        return Err(format!(
            "{direction:?} reported {} failed operations",
            get(DmaCounter::OpError)
        ));
    }
    if ops > 0 && get(DmaCounter::ReqCount) < ops {
        return Err(format!(
            "{direction:?} issued {} requests for {ops} operations",
            get(DmaCounter::ReqCount)
        ));
    }
    Ok(())
}
