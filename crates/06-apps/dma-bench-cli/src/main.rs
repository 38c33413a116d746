//! Command-line front end for the DMA benchmark card model.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dma_bench::{
    BenchDriver, BenchReport, DmaBenchDevice, DriverConfig, SWEEP_BLOCK_COUNT, SWEEP_MAX_SIZE,
};
use dma_engine::{Direction, EngineConfig, StatsSnapshot};
use pcie_transport::{LinkConfig, PcieLink};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, EnvFilter};

/// Text rendering helpers used by the CLI commands.
mod render {
    use dma_bench::BenchReport;
    use dma_engine::StatsSnapshot;
    use std::fmt::Write;

    /// One driver-style line per benchmark point.
    pub fn reports(reports: &[BenchReport]) -> String {
        let mut out = String::new();
        for report in reports {
            writeln!(out, "{report}").expect("write report");
        }
        out
    }

    /// `name: value` for each named counter; untouched counters only with `all`.
    pub fn counters(snapshot: &StatsSnapshot, all: bool) -> String {
        let mut out = String::new();
        for (name, value) in super::counter_rows(snapshot, all) {
            writeln!(out, "{name}: {value}").expect("write counter");
        }
        out
    }
}

/// Drive the DMA benchmark card model.
#[derive(Parser, Debug)]
#[command(author, version, about = "PCIe DMA engine benchmark", long_about = None)]
struct Cli {
    /// TOML file with `[engine]`, `[link]` and `[driver]` tables.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Emit JSON instead of text.
    #[arg(long)]
    json: bool,

    /// Override the link reorder seed.
    #[arg(long)]
    seed: Option<u64>,

    /// Let completions arrive out of order.
    #[arg(long)]
    reorder: bool,

    /// Link stall pattern, e.g. `1,1,1,0`; repeats forever.
    #[arg(long, value_parser = parse_pattern, value_name = "BITS")]
    stall: Option<StallPattern>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Copy a pattern to the card and back and compare.
    Selftest,
    /// Measure one block size and stride.
    Bench {
        #[arg(value_enum)]
        direction: DirectionArg,
        /// Block size in bytes (decimal or hex).
        #[arg(value_parser = parse_u64)]
        size: u64,
        /// Stride in bytes; defaults to the block size.
        #[arg(long, value_parser = parse_u64)]
        stride: Option<u64>,
        /// Blocks to transfer.
        #[arg(long, default_value_t = SWEEP_BLOCK_COUNT)]
        count: u64,
    },
    /// Run the probe sweep: sizes 1..=max, strides size..=max(size, 256).
    Sweep {
        #[arg(value_enum, default_value_t = DirectionArg::Both)]
        direction: DirectionArg,
        /// Largest block size.
        #[arg(long, value_parser = parse_u64, default_value_t = SWEEP_MAX_SIZE)]
        max_size: u64,
        /// Blocks per point.
        #[arg(long, default_value_t = SWEEP_BLOCK_COUNT)]
        count: u64,
    },
    /// Run the self-test and dump the statistics bank.
    Counters {
        /// Include counters that are still zero.
        #[arg(long)]
        all: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum DirectionArg {
    /// Host to card.
    Read,
    /// Card to host.
    Write,
    Both,
}

impl DirectionArg {
    fn directions(self) -> &'static [Direction] {
        match self {
            DirectionArg::Read => &[Direction::Read],
            DirectionArg::Write => &[Direction::Write],
            DirectionArg::Both => &[Direction::Read, Direction::Write],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct StallPattern(Vec<bool>);

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct BenchFile {
    engine: EngineConfig,
    link: LinkConfig,
    driver: DriverConfig,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut file = match &cli.config {
        Some(path) => load_config(path)?,
        None => BenchFile::default(),
    };
    if let Some(seed) = cli.seed {
        file.link.seed = seed;
    }
    file.link.reorder |= cli.reorder;

    let mut driver = build_driver(file, cli.stall.clone())?;

    match cli.command {
        Command::Selftest => {
            driver.self_test().context("self-test failed")?;
            if cli.json {
                println!("{}", serde_json::json!({ "selftest": "pass" }));
            } else {
                println!("test data matches");
            }
        }
        Command::Bench {
            direction,
            size,
            stride,
            count,
        } => {
            driver.self_test().context("self-test failed")?;
            let mut reports = Vec::new();
            for &dir in direction.directions() {
                reports.push(driver.block_bench(dir, size, stride.unwrap_or(size), count)?);
            }
            print_reports(&reports, cli.json)?;
        }
        Command::Sweep {
            direction,
            max_size,
            count,
        } => {
            driver.self_test().context("self-test failed")?;
            let mut reports = Vec::new();
            for &dir in direction.directions() {
                reports.extend(driver.sweep(dir, max_size, count)?);
            }
            if reports.is_empty() {
                bail!("no sweep points up to {max_size} bytes");
            }
            print_reports(&reports, cli.json)?;
        }
        Command::Counters { all } => {
            driver.self_test().context("self-test failed")?;
            let snapshot = driver.device().stats().snapshot();
            print_counters(&snapshot, all, cli.json)?;
        }
    }

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(env_filter).with_writer(std::io::stderr).try_init();
}

fn load_config(path: &Path) -> Result<BenchFile> {
    let text = fs::read_to_string(path).with_context(|| format!("failed to read {path:?}"))?;
    toml::from_str(&text).with_context(|| format!("failed to parse {path:?}"))
}

fn build_driver(file: BenchFile, stall: Option<StallPattern>) -> Result<BenchDriver<PcieLink>> {
    let mut link = PcieLink::new(file.link).context("invalid link configuration")?;
    if let Some(StallPattern(bits)) = stall {
        link.set_pause_generator(Some(Box::new(bits.into_iter().cycle())));
    }
    let device = DmaBenchDevice::new(link, file.engine).context("invalid engine configuration")?;
    Ok(BenchDriver::new(device, file.driver))
}

fn print_reports(reports: &[BenchReport], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(reports)?);
    } else {
        print!("{}", render::reports(reports));
    }
    Ok(())
}

fn print_counters(snapshot: &StatsSnapshot, all: bool, json: bool) -> Result<()> {
    if json {
        let map: serde_json::Map<String, serde_json::Value> = counter_rows(snapshot, all)
            .map(|(name, value)| (name.to_owned(), value.into()))
            .collect();
        println!("{}", serde_json::to_string_pretty(&map)?);
    } else {
        print!("{}", render::counters(snapshot, all));
    }
    Ok(())
}

fn counter_rows(
    snapshot: &StatsSnapshot,
    all: bool,
) -> Box<dyn Iterator<Item = (&'static str, u64)> + '_> {
    if all {
        Box::new(snapshot.named())
    } else {
        Box::new(snapshot.active())
    }
}

fn parse_u64(input: &str) -> Result<u64, String> {
    if let Some(stripped) = input.strip_prefix("0x") {
        u64::from_str_radix(stripped, 16).map_err(|_| format!("invalid hex value '{input}'"))
    } else {
        input
            .parse::<u64>()
            .map_err(|_| format!("invalid number '{input}'"))
    }
}

fn parse_pattern(input: &str) -> Result<StallPattern, String> {
    let bits = input
        .split(',')
        .map(|bit| match bit.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(format!("stall pattern entries are 0 or 1, got '{other}'")),
        })
        .collect::<Result<Vec<_>, _>>()?;
    if bits.iter().all(|&b| b) {
        return Err("stall pattern must contain at least one 0".into());
    }
    Ok(StallPattern(bits))
}
