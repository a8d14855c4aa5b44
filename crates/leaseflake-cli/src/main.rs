#![doc = include_str!("../README.md")]

mod config;
mod telemetry;

use clap::Parser;
use config::{CliArgs, Command, GeneratorConfig};
use core::time::Duration;
use leaseflake::{
    Decomposed, Encoder, FlakeId, Generator, MachineIdRepo, MemoryStore, SystemClock,
};
use std::{
    io::{self, Write},
    time::{SystemTime, UNIX_EPOCH},
};
use telemetry::init_telemetry;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    init_telemetry()?;

    let config = GeneratorConfig::try_from(&args.generator)?;
    if cfg!(debug_assertions) {
        tracing::debug!("Running with config: {:#?}", config);
    }

    match args.command {
        Command::Generate { count, json } => generate(&config, count, json).await,
        Command::Decompose { ids, json } => decompose(&config, &ids, json),
        Command::Hold { every_ms } => hold(&config, Duration::from_millis(every_ms)).await,
    }
}

/// Mints `count` identifiers under a fresh lease and releases it.
async fn generate(config: &GeneratorConfig, count: usize, json: bool) -> anyhow::Result<()> {
    let store = MemoryStore::with_max_machine_id(config.layout.max_machine_id());
    let generator = config.builder(store.repo()).build().await?;

    let minted = write_ids(&generator, count, json);
    let stopped = generator.stop().await;
    minted?;
    stopped?;
    Ok(())
}

fn write_ids<R>(generator: &Generator<R>, count: usize, json: bool) -> anyhow::Result<()>
where
    R: MachineIdRepo,
{
    let mut out = io::stdout().lock();
    for _ in 0..count {
        let id = generator.next_id()?;
        write_id(&mut out, generator.decompose(id), generator.to_time(id), json)?;
    }
    out.flush()?;
    Ok(())
}

/// Decomposes identifiers offline; the machine ID of the local encoder is
/// irrelevant here.
fn decompose(config: &GeneratorConfig, ids: &[u64], json: bool) -> anyhow::Result<()> {
    let encoder = Encoder::new(0, config.epoch, config.time_unit, config.layout, SystemClock)?;

    let mut out = io::stdout().lock();
    for raw in ids {
        let id = FlakeId::from_raw(*raw);
        if id.to_raw() != *raw {
            tracing::warn!(raw, "sign bit set, decomposing the low 63 bits");
        }
        write_id(&mut out, encoder.decompose(id), encoder.to_time(id), json)?;
    }
    out.flush()?;
    Ok(())
}

/// Holds a lease until a shutdown signal, minting one identifier per tick.
async fn hold(config: &GeneratorConfig, every: Duration) -> anyhow::Result<()> {
    if every.is_zero() {
        anyhow::bail!("--every-ms must be greater than 0");
    }

    let store = MemoryStore::with_max_machine_id(config.layout.max_machine_id());
    let generator = config.builder(store.repo()).build().await?;
    tracing::info!(
        machine_id = generator.machine_id(),
        ttl = ?generator.lease_ttl(),
        renewal_interval = ?generator.renewal_interval(),
        "Holding machine ID lease, press Ctrl+C to release"
    );

    let mut ticker = tokio::time::interval(every);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let minted = loop {
        tokio::select! {
            () = &mut shutdown => break Ok(()),
            _ = ticker.tick() => {
                let id = match generator.next_id() {
                    Ok(id) => id,
                    Err(e) => break Err(e),
                };
                let parts = generator.decompose(id);
                tracing::info!(
                    %id,
                    time = parts.time,
                    sequence = parts.sequence,
                    renewal_failures = generator.renewal_failures(),
                    "Minted"
                );
            }
        }
    };

    let stopped = generator.stop().await;
    let stats = store.stats();
    tracing::info!(
        acquire = stats.acquire,
        renew = stats.renew,
        release = stats.release,
        "Store calls"
    );
    minted?;
    stopped?;
    Ok(())
}

fn write_id(
    out: &mut impl Write,
    parts: Decomposed,
    time: SystemTime,
    json: bool,
) -> anyhow::Result<()> {
    let unix_ms = time
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();

    if json {
        let record = serde_json::json!({
            "id": parts.id,
            "time": parts.time,
            "machine_id": parts.machine_id,
            "sequence": parts.sequence,
            "unix_ms": u64::try_from(unix_ms).unwrap_or(u64::MAX),
        });
        serde_json::to_writer(&mut *out, &record)?;
        writeln!(out)?;
    } else {
        writeln!(
            out,
            "{}\ttime={} machine_id={} sequence={} unix_ms={}",
            parts.id, parts.time, parts.machine_id, parts.sequence, unix_ms
        )?;
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }
}
