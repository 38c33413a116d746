//! BAR register map. All accesses are 32 bits wide; 64-bit fields are split
//! into a low word at `+0` and a high word at `+4`.

/// bit0 enables descriptor processing.
pub const CTRL_ENABLE: u32 = 0x00_0000;
/// bit0 read-done interrupt, bit1 write-done interrupt.
pub const IRQ_ENABLE: u32 = 0x00_0008;

pub const RD_DESC_BASE: u32 = 0x00_0100;
pub const WR_DESC_BASE: u32 = 0x00_0200;

pub const DESC_PCIE_ADDR_LO: u32 = 0x00;
pub const DESC_PCIE_ADDR_HI: u32 = 0x04;
/// On the write channel this word doubles as immediate data.
pub const DESC_RAM_ADDR_LO: u32 = 0x08;
pub const DESC_RAM_ADDR_HI: u32 = 0x0C;
pub const DESC_LEN: u32 = 0x10;
/// Writing the tag starts the transfer.
pub const DESC_TAG: u32 = 0x14;
pub const DESC_STATUS: u32 = 0x18;

/// Tag-register flag selecting an immediate write.
pub const TAG_IMMEDIATE: u32 = 1 << 31;
/// Width of host-visible tags.
pub const TAG_MASK: u32 = 0xFF;

pub const RD_BLOCK_BASE: u32 = 0x00_1000;
pub const WR_BLOCK_BASE: u32 = 0x00_1100;

/// Write 1 to start; bit0 reads busy. A start written while busy is ignored
/// and the active run continues unchanged.
pub const BLOCK_CTRL: u32 = 0x00;
pub const BLOCK_CYCLES_LO: u32 = 0x08;
pub const BLOCK_CYCLES_HI: u32 = 0x0C;
pub const BLOCK_LEN: u32 = 0x10;
pub const BLOCK_COUNT_LO: u32 = 0x18;
pub const BLOCK_COUNT_HI: u32 = 0x1C;
pub const BLOCK_PCIE_WINDOW: u32 = 0x80;
pub const BLOCK_RAM_WINDOW: u32 = 0xC0;

pub const WINDOW_BASE: u32 = 0x00;
pub const WINDOW_OFFSET: u32 = 0x08;
pub const WINDOW_MASK: u32 = 0x10;
pub const WINDOW_STRIDE: u32 = 0x18;
/// Bytes spanned by one window's register group.
pub const WINDOW_SPAN: u32 = 0x20;

pub const STATS_BASE: u32 = 0x01_0000;
pub const STATS_STRIDE: u32 = 8;

/// Register offset of the low word of statistics counter `index`.
pub const fn stat_counter(index: usize) -> u32 {
    STATS_BASE + index as u32 * STATS_STRIDE
}

/// Replaces the low or high half of a 64-bit register.
pub(crate) fn set_half(reg: &mut u64, high: bool, value: u32) {
    if high {
        *reg = (*reg & 0xFFFF_FFFF) | (u64::from(value) << 32);
    } else {
        *reg = (*reg & !0xFFFF_FFFF) | u64::from(value);
    }
}

/// Low or high half of a 64-bit register.
pub(crate) fn get_half(reg: u64, high: bool) -> u32 {
    if high {
        (reg >> 32) as u32
    } else {
        reg as u32
    }
}
