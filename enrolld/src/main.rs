//! `enrolld` — TLS-authenticated agent enrollment daemon.
//!
//! Phased startup mirrors `restream.rs::main`: install the default crypto
//! provider, load configuration, initialize tracing, construct the
//! `Service`, and run it to completion.

use std::path::PathBuf;

use clap::Parser;
use enrolld_common::config::{self, CliOverrides};
use enrolld_common::Service;

/// CLI flags layered on top of file/environment configuration, in the same
/// style as `server_sql.rs::AppConfig`'s `clap::Parser` usage.
#[derive(Debug, Parser)]
#[command(name = "enrolld", about = "TLS-authenticated agent enrollment daemon")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short = 'c', long = "config", default_value = "/etc/enrolld/enrolld.toml")]
    config: PathBuf,

    /// Validate configuration and exit without binding a socket.
    #[arg(short = 't', long = "test-config")]
    test_config: bool,

    /// Run attached to the terminal instead of forking to the background.
    /// The daemon never forks itself in this implementation — this flag is
    /// accepted for command-line compatibility and only affects whether a
    /// startup banner is printed.
    #[arg(long)]
    foreground: bool,

    /// Override the configured listen port.
    #[arg(short = 'p', long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install default rustls crypto provider"))?;

    let cli = Cli::parse();
    let overrides = CliOverrides {
        config_path: Some(cli.config.clone()),
        port: cli.port,
        foreground: cli.foreground,
    };

    let app_config = config::load(&cli.config, &overrides)?;

    if cli.test_config {
        println!("configuration at {} is valid", cli.config.display());
        return Ok(());
    }

    let _tracing_guard = enrolld_common::logging::init_tracing(&app_config.logging)?;

    if cli.foreground {
        eprintln!("enrolld starting in foreground, listening on {}:{}", app_config.network.bind_addr, app_config.network.port);
    }

    let service = Service::new(app_config)?;
    service.run().await
}
