// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! corelink-scan - find music Cores on the local network.
//!
//! Sends one SOOD query round (multicast plus per-interface broadcast)
//! and prints every Core that answered.
//!
//! # Usage
//!
//! ```bash
//! # One scan with the default 3 s window
//! corelink-scan
//!
//! # Longer window, repeated every 10 s
//! corelink-scan --timeout-ms 5000 --watch 10
//! ```

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// SOOD discovery scanner
#[derive(Parser, Debug, Clone)]
#[command(name = "corelink-scan")]
#[command(about = "Scan the local network for music Cores")]
#[command(version)]
struct Args {
    /// Receive window per scan, in milliseconds
    #[arg(short, long, default_value = "3000")]
    timeout_ms: u64,

    /// Repeat the scan every N seconds (0 = scan once)
    #[arg(short, long, default_value = "0")]
    watch: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = args.log_level.parse().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(false)
        .init();

    info!("corelink-scan v{}", env!("CARGO_PKG_VERSION"));

    loop {
        scan(Duration::from_millis(args.timeout_ms)).await?;
        if args.watch == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_secs(args.watch)).await;
    }

    Ok(())
}

async fn scan(timeout: Duration) -> Result<()> {
    info!("scanning for {timeout:?}...");
    let mut cores = corelink::discover(timeout).await?;
    cores.sort_by(|a, b| a.unique_id.cmp(&b.unique_id));

    if cores.is_empty() {
        println!("no cores found");
        return Ok(());
    }

    for core in cores {
        println!(
            "{}  {}:{}  {}  {}",
            core.unique_id,
            core.host,
            core.port,
            core.name.as_deref().unwrap_or("-"),
            core.version.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}
