//! `tsec`: host tool for TSEC key queries.
//!
//! ```text
//! USAGE:
//!   tsec query --firmware <path> --simulate     Run against the software model
//!   tsec query --firmware <path> --carveout <a> Run against /dev/mem (root)
//!   tsec decode-exci <value>                    Decode a Falcon EXCI word
//!   tsec regs                                   Print the register map
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tsec_chip::base::Block;
use tsec_chip::car::Domain;
use tsec_chip::exception::ExceptionInfo;
use tsec_chip::{host1x, kfuse, regs, sor};
use tsec_driver::sim::{EngineModel, SimulatedSoc};
use tsec_driver::{ExecutionContext, QueryConfig, Soc, Tsec, WaitPolicy, DEFAULT_KEY_VERSION, KEY_LEN};

#[derive(Parser)]
#[command(name = "tsec", about = "Tegra X1 TSEC query tool", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Load a firmware image, run it, and report the result.
    Query {
        /// Firmware image to load.
        #[arg(long)]
        firmware: std::path::PathBuf,
        /// Value for the boot-key-version mailbox.
        #[arg(long, default_value_t = DEFAULT_KEY_VERSION)]
        key_version: u8,
        /// Run against the software engine model instead of hardware.
        #[arg(long, conflicts_with = "carveout")]
        simulate: bool,
        /// Physical address of a reserved, 256-byte aligned DMA carveout.
        #[arg(long, value_parser = parse_u64, required_unless_present = "simulate")]
        carveout: Option<u64>,
        /// Carveout length in bytes.
        #[arg(long, value_parser = parse_u64, default_value = "0x4000")]
        carveout_len: u64,
        /// Completion policy (bounded or halt); overrides TSEC_WAIT_POLICY.
        #[arg(long)]
        wait: Option<WaitPolicy>,
        /// Explicit mailbox pair, e.g. `0x1,0x0`.
        #[arg(long, value_parser = parse_mailboxes)]
        mailboxes: Option<[u32; 2]>,
        /// Print the derived key in hex.
        #[arg(long)]
        reveal: bool,
    },
    /// Decode a Falcon exception-info word.
    DecodeExci {
        /// Raw EXCI value (hex with 0x prefix, or decimal).
        #[arg(value_parser = parse_u64)]
        value: u64,
    },
    /// Print block bases and the registers the driver touches.
    Regs,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Query {
            firmware,
            key_version,
            simulate,
            carveout,
            carveout_len,
            wait,
            mailboxes,
            reveal,
        } => {
            let mut config = QueryConfig::from_env().context("reading TSEC_* environment")?;
            if let Some(policy) = wait {
                config = config.with_wait_policy(policy);
            }
            if let Some([m0, m1]) = mailboxes {
                config = config.with_mailboxes(m0, m1);
            }
            let image = std::fs::read(&firmware)
                .with_context(|| format!("reading {}", firmware.display()))?;
            let target = if simulate {
                Target::Simulated
            } else {
                let phys = carveout.context("--carveout is required without --simulate")?;
                let len = usize::try_from(carveout_len).context("carveout length")?;
                Target::DevMem { phys, len }
            };
            cmd_query(&image, key_version, config, target, reveal)?;
        }
        Cmd::DecodeExci { value } => cmd_decode_exci(value)?,
        Cmd::Regs => cmd_regs(),
    }

    Ok(())
}

enum Target {
    Simulated,
    DevMem { phys: u64, len: usize },
}

fn cmd_query(
    image: &[u8],
    key_version: u8,
    config: QueryConfig,
    target: Target,
    reveal: bool,
) -> Result<()> {
    let soc = match target {
        Target::Simulated => {
            info!("Querying the simulated engine ({} byte firmware)", image.len());
            // The model outlives the query through the Arcs inside `Soc`.
            SimulatedSoc::new(EngineModel::default()).soc()
        }
        Target::DevMem { phys, len } => {
            info!("Querying hardware, DMA carveout {phys:#x} ({len:#x} bytes)");
            Soc::map_devmem(phys, len).context("mapping TSEC blocks (are you root?)")?
        }
    };

    let mut tsec = Tsec::with_system_timer(soc, config);
    let mut ctx = ExecutionContext::new(image);
    let mut key = [0u8; KEY_LEN];
    let result = tsec.query(&mut key, key_version, &mut ctx);

    println!("Firmware   {} bytes", image.len());
    println!("Status     {:#010x}", ctx.status);
    println!("CmdErr     {:#010x}", ctx.cmd_err);
    println!("EXCI       {:#010x}", ctx.exception_info);

    match result {
        Ok(()) => {
            if reveal {
                let hex: String = key.iter().map(|b| format!("{b:02x}")).collect();
                println!("Key        {hex}");
            } else {
                println!("Key        <{KEY_LEN} bytes, pass --reveal to print>");
            }
            Ok(())
        }
        Err(e) => {
            if let Some(info) = e.exception() {
                println!("Fault      {info}");
            }
            let code = e.code();
            Err(e).context(format!("TSEC query failed (code {code})"))
        }
    }
}

fn cmd_decode_exci(value: u64) -> Result<()> {
    let Ok(raw) = u32::try_from(value) else {
        bail!("EXCI is a 32-bit register, got {value:#x}");
    };
    let info = ExceptionInfo::new(raw);
    if !info.is_fault() {
        println!("{raw:#010x}: no exception");
        return Ok(());
    }
    println!("{info}");
    println!("  cause  {}", info.cause());
    println!("  pc     {:#07x}", info.pc());
    Ok(())
}

fn cmd_regs() {
    println!("Blocks:");
    for block in Block::ALL {
        println!("  {:<8} {:#010x}  window {:#x}", block.name(), block.base(), block.size());
    }

    println!();
    println!("TSEC:");
    let tsec_regs = [
        ("IRQMSET", regs::IRQMSET),
        ("IRQDEST", regs::IRQDEST),
        ("MAILBOX0", regs::MAILBOX0),
        ("MAILBOX1", regs::MAILBOX1),
        ("ITFEN", regs::ITFEN),
        ("CPUCTL", regs::CPUCTL),
        ("BOOTVEC", regs::BOOTVEC),
        ("DMACTL", regs::DMACTL),
        ("DMATRFBASE", regs::DMATRFBASE),
        ("DMATRFMOFFS", regs::DMATRFMOFFS),
        ("DMATRFCMD", regs::DMATRFCMD),
        ("DMATRFFBOFFS", regs::DMATRFFBOFFS),
        ("EXCI", regs::EXCI),
        ("CMD_ERR", regs::CMD_ERR),
    ];
    for (name, offset) in tsec_regs {
        println!("  {name:<13} +{offset:#06x}");
    }

    println!();
    println!("Handshake  HOST1X +{:#06x} = {:#010x}", host1x::CH0_SYNC_SYNCPT_160, host1x::SYNCPT_160_MAGIC);
    println!("KFUSE      STATE  +{:#06x}", kfuse::STATE);
    let result: Vec<String> = sor::RESULT_REGS.iter().map(|r| format!("{r:#x}")).collect();
    println!("Result     SOR1   {}", result.join(", "));

    println!();
    println!("Clock bundle (enable order):");
    for domain in Domain::TSEC_BUNDLE {
        let r = domain.regs();
        println!(
            "  {:<9} enable +{:#05x} reset +{:#05x} bit {}",
            domain.name(),
            r.enable,
            r.reset,
            r.bit
        );
    }
}

fn parse_u64(s: &str) -> std::result::Result<u64, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => s.replace('_', "").parse(),
    };
    parsed.map_err(|e| format!("{s:?}: {e}"))
}

fn parse_mailboxes(s: &str) -> std::result::Result<[u32; 2], String> {
    let Some((a, b)) = s.split_once(',') else {
        return Err("expected two values separated by a comma".into());
    };
    let word = |v: &str| {
        parse_u64(v).and_then(|n| u32::try_from(n).map_err(|_| format!("{v:?} exceeds 32 bits")))
    };
    Ok([word(a)?, word(b)?])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_accept_hex_and_decimal() {
        assert_eq!(parse_u64("0x4000"), Ok(0x4000));
        assert_eq!(parse_u64("0x8000_0000"), Ok(0x8000_0000));
        assert_eq!(parse_u64("256"), Ok(256));
        assert!(parse_u64("0xg").is_err());
    }

    #[test]
    fn mailbox_pair_is_two_words() {
        assert_eq!(parse_mailboxes("0x1,0"), Ok([1, 0]));
        assert!(parse_mailboxes("0x1").is_err());
        assert!(parse_mailboxes("0x1,0x1_0000_0000").is_err());
    }

    #[test]
    fn query_needs_a_target() {
        assert!(Cli::try_parse_from(["tsec", "query", "--firmware", "fw.bin", "--simulate"]).is_ok());
        assert!(Cli::try_parse_from(["tsec", "query", "--firmware", "fw.bin"]).is_err());
        assert!(Cli::try_parse_from([
            "tsec", "query", "--firmware", "fw.bin", "--simulate", "--carveout", "0x1000",
        ])
        .is_err());
    }

    #[test]
    fn simulated_query_succeeds() {
        let image = vec![0u8; 512];
        cmd_query(&image, DEFAULT_KEY_VERSION, QueryConfig::default(), Target::Simulated, false)
            .unwrap();
    }

    #[test]
    fn simulated_query_reports_the_error_code() {
        let image = vec![0u8; 512];
        let config = QueryConfig::default().with_mailboxes(0x1, regs::STATUS_SUCCESS);
        let err = cmd_query(&image, DEFAULT_KEY_VERSION, config, Target::Simulated, false)
            .unwrap_err();
        assert!(format!("{err:#}").contains("code -10"), "{err:#}");
    }
}
