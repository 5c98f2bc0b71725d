//! stake-ledger: replay staking / vesting operations against an in-memory
//! ledger and inspect vesting schedules.

use std::{
    fs::File,
    io::{self, BufReader, Write},
    path::PathBuf,
};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};

use stake_ledger::{
    access::Role,
    config::LedgerConfig,
    script::{parse_duration, parse_script, ScriptRunner},
    token::{format_units, parse_units},
    vesting::vested_amount,
};

//==================== CLI ====================//

#[derive(Parser, Debug)]
#[command(
    name = "stake-ledger",
    version,
    about = "Token staking and linear vesting ledger"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a JSON-lines operation script and print one report per step.
    Run {
        /// Script file, one operation per line.
        script: PathBuf,

        /// Ledger bootstrap config (JSON). Defaults apply when omitted.
        #[arg(long, env = "STAKE_LEDGER_CONFIG")]
        config: Option<PathBuf>,

        /// Continue after a failing step instead of stopping.
        #[arg(long)]
        keep_going: bool,

        /// Print the final ledger snapshot after the last step.
        #[arg(long)]
        snapshot: bool,
    },

    /// Print the cumulative vesting curve of a single lock.
    Schedule {
        /// Principal in whole tokens (decimal string).
        #[arg(long)]
        amount: String,

        /// Lock duration: seconds or a value like `365d`.
        #[arg(long)]
        duration: String,

        /// Number of intervals between creation and full vesting.
        #[arg(long, default_value_t = 12)]
        steps: u64,

        #[arg(long, default_value_t = 18)]
        decimals: u8,

        /// Amount already claimed, in whole tokens.
        #[arg(long, default_value = "0")]
        claimed: String,
    },

    /// Print the 32-byte identifier carried in role events.
    RoleId {
        #[arg(value_enum)]
        role: RoleArg,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RoleArg {
    Owner,
    Admin,
}

impl From<RoleArg> for Role {
    fn from(arg: RoleArg) -> Self {
        match arg {
            RoleArg::Owner => Role::Owner,
            RoleArg::Admin => Role::Admin,
        }
    }
}

//==================== commands ====================//

fn run_cmd(
    script: PathBuf,
    config: Option<PathBuf>,
    keep_going: bool,
    snapshot: bool,
) -> anyhow::Result<()> {
    let config = match config {
        Some(path) => LedgerConfig::load(&path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => LedgerConfig::default(),
    };
    let file = File::open(&script).with_context(|| format!("opening {}", script.display()))?;
    let ops = parse_script(BufReader::new(file))
        .with_context(|| format!("parsing {}", script.display()))?;
    let mut runner = ScriptRunner::from_config(&config).context("bootstrapping ledger")?;
    tracing::info!(script = %script.display(), steps = ops.len(), "replaying script");

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut failures = 0usize;
    for (line, op) in ops {
        let report = runner.execute(line, op);
        serde_json::to_writer(&mut out, &report)?;
        writeln!(out)?;
        if !report.ok {
            failures += 1;
            if !keep_going {
                bail!(
                    "line {line}: {}",
                    report.error.unwrap_or_else(|| "operation failed".to_string())
                );
            }
        }
    }

    match runner.ledger().audit_custody() {
        Ok(report) => tracing::info!(
            custody = %report.custody_balance,
            liabilities = %report.liabilities,
            "custody audit passed"
        ),
        Err(err) => tracing::error!(error = %err, "custody audit failed"),
    }
    if snapshot {
        serde_json::to_writer_pretty(&mut out, &runner.ledger().snapshot())?;
        writeln!(out)?;
    }
    if failures > 0 {
        tracing::warn!(failures, "script finished with failing steps");
    }
    Ok(())
}

fn schedule_cmd(
    amount: &str,
    duration: &str,
    steps: u64,
    decimals: u8,
    claimed: &str,
) -> anyhow::Result<()> {
    if steps == 0 {
        bail!("--steps must be > 0");
    }
    let amount = parse_units(amount, decimals).context("invalid --amount")?;
    let claimed = parse_units(claimed, decimals).context("invalid --claimed")?;
    let duration = parse_duration(duration).context("invalid --duration")?;
    if amount == 0 {
        bail!("--amount must be > 0");
    }
    if duration == 0 {
        bail!("--duration must be > 0");
    }
    if claimed > amount {
        bail!("--claimed exceeds --amount");
    }

    println!("{:>12}  {:>10}  {:>32}  {:>32}", "elapsed_s", "elapsed_d", "vested", "claimable");
    for i in 0..=steps {
        let elapsed = (duration as u128 * i as u128 / steps as u128) as u64;
        let vested = vested_amount(amount, elapsed, duration);
        let claimable = vested.saturating_sub(claimed);
        println!(
            "{:>12}  {:>10.2}  {:>32}  {:>32}",
            elapsed,
            elapsed as f64 / 86_400.0,
            format_units(vested, decimals),
            format_units(claimable, decimals)
        );
    }
    Ok(())
}

//==================== main ====================//

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("stake_ledger=info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            script,
            config,
            keep_going,
            snapshot,
        } => run_cmd(script, config, keep_going, snapshot),
        Command::Schedule {
            amount,
            duration,
            steps,
            decimals,
            claimed,
        } => schedule_cmd(&amount, &duration, steps, decimals, &claimed),
        Command::RoleId { role } => {
            let role = Role::from(role);
            println!("{} 0x{}", role, role.hex_id());
            Ok(())
        }
    }
}
