//! Process-wide `tracing` setup: an `EnvFilter` seeded from the configured log level, with noisy
//! transport crates muted, and a pretty/JSON switch driven by `Development.pretty_logging`.

use anyhow::{Context, Result};
use std::str::FromStr;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

pub fn init(log_level: &str, pretty: bool) -> Result<()> {
    let level =
        LevelFilter::from_str(log_level).context("could not parse 'log_level' configuration")?;

    let filter = EnvFilter::from_default_env()
        .add_directive("sqlx=off".parse().expect("valid directive"))
        .add_directive("h2=off".parse().expect("valid directive"))
        .add_directive("hyper=off".parse().expect("valid directive"))
        .add_directive("rustls=off".parse().expect("valid directive"))
        .add_directive("bollard=off".parse().expect("valid directive"))
        .add_directive(level.into());

    if pretty {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .init();
    }

    if pretty {
        tracing::warn!("pretty logging activated due to config value 'development.pretty_logging'");
    }

    Ok(())
}
