use serde::{Deserialize, Serialize};

use crate::{EngineError, EngineResult};

/// Largest operation table the 16-bit slot index can address.
pub const MAX_OP_TABLE_SIZE: usize = 1 << 16;

/// Address boundary no bus request may cross.
pub const PCIE_BOUNDARY: u32 = 4096;

/// Static shape of a [`DmaEngine`](crate::DmaEngine).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Largest write payload per request.
    pub max_payload_size: u32,
    /// Largest read request.
    pub max_read_request_size: u32,
    /// Number of operation-table slots.
    pub op_table_size: usize,
    /// Requests never straddle a multiple of this address.
    pub boundary: u32,
    /// Card RAM base address.
    pub ram_base: u64,
    /// Card RAM size in bytes.
    pub ram_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_payload_size: 256,
            max_read_request_size: 512,
            op_table_size: 64,
            boundary: PCIE_BOUNDARY,
            ram_base: 0,
            ram_size: 64 * 1024,
        }
    }
}

fn valid_bound(size: u32) -> bool {
    size.is_power_of_two() && (128..=PCIE_BOUNDARY).contains(&size)
}

impl EngineConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if !valid_bound(self.max_payload_size) {
            return Err(EngineError::InvalidConfig(
                "max_payload_size must be a power of two in 128..=4096",
            ));
        }
        if !valid_bound(self.max_read_request_size) {
            return Err(EngineError::InvalidConfig(
                "max_read_request_size must be a power of two in 128..=4096",
            ));
        }
        if !self.boundary.is_power_of_two()
            || self.boundary > PCIE_BOUNDARY
            || self.boundary < self.max_payload_size.max(self.max_read_request_size)
        {
            return Err(EngineError::InvalidConfig(
                "boundary must be a power of two between the request bounds and 4096",
            ));
        }
        if self.op_table_size == 0 || self.op_table_size > MAX_OP_TABLE_SIZE {
            return Err(EngineError::InvalidConfig("op_table_size must be in 1..=65536"));
        }
        if self.ram_size == 0 {
            return Err(EngineError::InvalidConfig("ram_size must be non-zero"));
        }
        Ok(())
    }
}
