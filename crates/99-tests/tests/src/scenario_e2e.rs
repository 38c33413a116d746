use dma_bench::checks::{verify_copy, verify_status};
use dma_bench::{regs, DmaBenchDevice};
use dma_engine::{Direction, EngineConfig};
use pcie_transport::PcieLink;

use crate::harness::{link, pattern};

fn program(
    dev: &mut DmaBenchDevice<PcieLink>,
    base: u32,
    pcie_addr: u64,
    ram_addr: u64,
    len: u32,
    tag: u32,
) {
    dev.write_reg(base + regs::DESC_PCIE_ADDR_LO, pcie_addr as u32).unwrap();
    dev.write_reg(base + regs::DESC_PCIE_ADDR_HI, (pcie_addr >> 32) as u32).unwrap();
    dev.write_reg(base + regs::DESC_RAM_ADDR_LO, ram_addr as u32).unwrap();
    dev.write_reg(base + regs::DESC_RAM_ADDR_HI, 0).unwrap();
    dev.write_reg(base + regs::DESC_LEN, len).unwrap();
    dev.write_reg(base + regs::DESC_TAG, tag).unwrap();
}

fn device() -> DmaBenchDevice<PcieLink> {
    let mut dev = DmaBenchDevice::new(link(), EngineConfig::default()).unwrap();
    dev.write_reg(regs::CTRL_ENABLE, 1).unwrap();
    dev
}

#[test]
fn read_then_write_back_through_registers() {
    let mut dev = device();
    let data = pattern(0x100, 0x11);
    dev.link_mut().host_mut().write(0x1000, &data).unwrap();

    program(&mut dev, regs::RD_DESC_BASE, 0x1000, 0x100, 0x100, 0xAA);
    dev.run_until("read", 10_000, |d| {
        d.read_reg(regs::RD_DESC_BASE + regs::DESC_STATUS) & 0xFF == 0xAA
    })
    .unwrap();
    assert_eq!(dev.read_reg(regs::RD_DESC_BASE + regs::DESC_STATUS), 0x8000_00AA);

    program(&mut dev, regs::WR_DESC_BASE, 0x1100, 0x100, 0x100, 0x55);
    dev.run_until("write", 10_000, |d| {
        d.read_reg(regs::WR_DESC_BASE + regs::DESC_STATUS) & 0xFF == 0x55
    })
    .unwrap();
    assert_eq!(dev.read_reg(regs::WR_DESC_BASE + regs::DESC_STATUS), 0x8000_0055);

    let back = dev.link().host().read_vec(0x1100, 0x100).unwrap();
    verify_copy(&data, &back).unwrap();
    assert_eq!(dev.engine().ram().read_vec(0x100, 0x100).unwrap(), data);
}

#[test]
fn channels_run_side_by_side_in_either_order() {
    let mut dev = device();
    let host_data = pattern(0x400, 0x3C);
    let ram_data = pattern(0x400, 0xC3);
    dev.link_mut().host_mut().write(0, &host_data).unwrap();
    dev.engine_mut().ram_mut().write(0x2000, &ram_data).unwrap();

    // A long read and a short write issued back to back; retirement order is not fixed.
    program(&mut dev, regs::RD_DESC_BASE, 0, 0x100, 0x400, 0xAA);
    program(&mut dev, regs::WR_DESC_BASE, 0x8000, 0x2000, 0x10, 0x55);
    dev.run_until("both", 10_000, |d| d.is_idle()).unwrap();

    verify_status(dev.status(Direction::Read), 0xAA, None).unwrap();
    verify_status(dev.status(Direction::Write), 0x55, None).unwrap();
    assert_eq!(dev.engine().ram().read_vec(0x100, 0x400).unwrap(), host_data);
    assert_eq!(dev.link().host().read_vec(0x8000, 0x10).unwrap(), &ram_data[..0x10]);
}

#[test]
fn high_address_words_reach_the_link() {
    let mut dev = device();
    // Outside the host window: answered with an unsupported-request completion.
    program(&mut dev, regs::RD_DESC_BASE, 0x1_0000_0000, 0, 16, 0x21);
    dev.run_until("read", 10_000, |d| d.is_idle()).unwrap();
    verify_status(
        dev.status(Direction::Read),
        0x21,
        Some(dma_engine::ErrorKind::UnsupportedRequest),
    )
    .unwrap();
    assert_eq!(dev.error_monitors().correctable, 1);
    assert_eq!(dev.error_monitors().uncorrectable, 0);
}

#[test]
fn zero_length_descriptor_completes_without_traffic() {
    let mut dev = device();
    program(&mut dev, regs::WR_DESC_BASE, 0x40, 0, 0, 0x09);
    dev.run_until("empty", 100, |d| d.is_idle()).unwrap();
    verify_status(dev.status(Direction::Write), 0x09, None).unwrap();
    assert_eq!(dev.link().metrics().writes, 0);
}
