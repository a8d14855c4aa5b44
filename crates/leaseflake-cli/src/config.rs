use anyhow::{anyhow, bail};
use clap::{Args, Parser, Subcommand};
use core::time::Duration;
use leaseflake::{BitLayout, Generator, GeneratorBuilder, MachineIdRepo};
use std::time::{SystemTime, UNIX_EPOCH};

/// Command-line interface of the `leaseflake-cli` binary.
///
/// Generator settings are shared by every subcommand and can be given as
/// flags or environment variables. A `.env` file in the working directory is
/// loaded first.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "leaseflake-cli",
    version,
    about = "Mint and inspect time-ordered IDs backed by a leased machine ID"
)]
pub struct CliArgs {
    #[command(flatten)]
    pub generator: GeneratorArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct GeneratorArgs {
    /// Epoch of the time field, in milliseconds since 1970-01-01 UTC.
    ///
    /// Must be in the past. Every process sharing the ID space must use the
    /// same value.
    ///
    /// Environment variable: `LEASEFLAKE_START_TIME_MS`
    #[arg(
        long,
        env = "LEASEFLAKE_START_TIME_MS",
        default_value_t = 1_735_689_600_000,
        global = true
    )]
    pub start_time_ms: u64,

    /// Resolution of the time field, in milliseconds.
    ///
    /// Environment variable: `LEASEFLAKE_TIME_UNIT_MS`
    #[arg(long, env = "LEASEFLAKE_TIME_UNIT_MS", default_value_t = 10, global = true)]
    pub time_unit_ms: u64,

    /// Lease duration requested from the store, in milliseconds.
    ///
    /// Environment variable: `LEASEFLAKE_LEASE_TTL_MS`
    #[arg(long, env = "LEASEFLAKE_LEASE_TTL_MS", default_value_t = 30_000, global = true)]
    pub lease_ttl_ms: u64,

    /// Time between lease renewals, in milliseconds. Must be below the TTL.
    ///
    /// Environment variable: `LEASEFLAKE_RENEWAL_INTERVAL_MS`
    #[arg(
        long,
        env = "LEASEFLAKE_RENEWAL_INTERVAL_MS",
        default_value_t = 10_000,
        global = true
    )]
    pub renewal_interval_ms: u64,

    /// Deadline for each call to the store, in milliseconds.
    ///
    /// Environment variable: `LEASEFLAKE_STORE_TIMEOUT_MS`
    #[arg(
        long,
        env = "LEASEFLAKE_STORE_TIMEOUT_MS",
        default_value_t = 5_000,
        global = true
    )]
    pub store_timeout_ms: u64,

    /// Width of the sequence field.
    ///
    /// Environment variable: `LEASEFLAKE_SEQUENCE_BITS`
    #[arg(long, env = "LEASEFLAKE_SEQUENCE_BITS", default_value_t = 8, global = true)]
    pub sequence_bits: u8,

    /// Width of the machine ID field.
    ///
    /// Environment variable: `LEASEFLAKE_MACHINE_ID_BITS`
    #[arg(long, env = "LEASEFLAKE_MACHINE_ID_BITS", default_value_t = 16, global = true)]
    pub machine_id_bits: u8,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Lease a machine ID, mint identifiers and release the lease.
    Generate {
        /// Number of identifiers to mint.
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,

        /// Print one JSON object per identifier.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Split identifiers into their fields without leasing anything.
    Decompose {
        /// Identifiers to decompose.
        #[arg(required = true)]
        ids: Vec<u64>,

        /// Print one JSON object per identifier.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Hold a lease and mint one identifier per tick until Ctrl+C or SIGTERM.
    Hold {
        /// Milliseconds between two identifiers.
        #[arg(long, default_value_t = 1_000)]
        every_ms: u64,
    },
}

/// Validated generator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorConfig {
    pub epoch: Duration,
    pub time_unit: Duration,
    pub lease_ttl: Duration,
    pub renewal_interval: Duration,
    pub store_timeout: Duration,
    pub layout: BitLayout,
}

impl GeneratorConfig {
    pub fn start_time(&self) -> SystemTime {
        UNIX_EPOCH + self.epoch
    }

    /// A builder carrying these settings on top of `repo`.
    pub fn builder<R>(&self, repo: R) -> GeneratorBuilder<R>
    where
        R: MachineIdRepo,
    {
        Generator::builder()
            .repo(repo)
            .start_time(self.start_time())
            .time_unit(self.time_unit)
            .lease_ttl(self.lease_ttl)
            .renewal_interval(self.renewal_interval)
            .store_timeout(self.store_timeout)
            .layout(self.layout)
    }
}

impl TryFrom<&GeneratorArgs> for GeneratorConfig {
    type Error = anyhow::Error;

    fn try_from(args: &GeneratorArgs) -> Result<Self, Self::Error> {
        if args.time_unit_ms == 0 {
            bail!("LEASEFLAKE_TIME_UNIT_MS must be greater than 0");
        }

        if args.lease_ttl_ms == 0 || args.renewal_interval_ms == 0 || args.store_timeout_ms == 0 {
            bail!(
                "LEASEFLAKE_LEASE_TTL_MS, LEASEFLAKE_RENEWAL_INTERVAL_MS and LEASEFLAKE_STORE_TIMEOUT_MS must be greater than 0"
            );
        }

        if args.renewal_interval_ms >= args.lease_ttl_ms {
            bail!(
                "LEASEFLAKE_RENEWAL_INTERVAL_MS ({}) must be less than LEASEFLAKE_LEASE_TTL_MS ({})",
                args.renewal_interval_ms,
                args.lease_ttl_ms
            );
        }

        let epoch = Duration::from_millis(args.start_time_ms);
        UNIX_EPOCH.checked_add(epoch).ok_or_else(|| {
            anyhow!(
                "LEASEFLAKE_START_TIME_MS ({}) is out of range",
                args.start_time_ms
            )
        })?;

        let layout = BitLayout::new(args.sequence_bits, args.machine_id_bits)?;

        Ok(Self {
            epoch,
            time_unit: Duration::from_millis(args.time_unit_ms),
            lease_ttl: Duration::from_millis(args.lease_ttl_ms),
            renewal_interval: Duration::from_millis(args.renewal_interval_ms),
            store_timeout: Duration::from_millis(args.store_timeout_ms),
            layout,
        })
    }
}
