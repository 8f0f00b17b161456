//! `reimage` pins, relocates, scans and attests container image references
//! embedded in deployment manifests.

#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![deny(unsafe_code)]
#![deny(missing_docs)]
#![warn(rust_2018_idioms)]

use std::io::{Read, Write};

use clap::Parser;
use color_eyre::eyre::{Context, Result};
use reimage::cli::Application;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let app = Application::parse();
    init_tracing(app.debug)?;

    let input = if app.mappings_only {
        String::new()
    } else {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("read manifest stream from stdin")?;
        buf
    };

    let stdout = std::io::stdout();
    let mut output = stdout.lock();

    let (mapping, errors) = reimage::orchestrator::run(&app, &input, &mut output).await?;
    output.flush().context("flush stdout")?;

    tracing::info!(images = mapping.len(), errors = errors.len(), "run complete");

    if !errors.is_empty() {
        for err in &errors.remap {
            tracing::error!(image = %err.image, error = %err.error, "remap failed");
        }
        for err in &errors.vuln {
            tracing::error!(image = %err.image, error = %err.error, "vulnerability check failed");
        }
        for err in &errors.attest {
            tracing::error!(image = %err.image, error = %err.error, "attestation failed");
        }
        std::process::exit(1);
    }

    Ok(())
}

fn init_tracing(debug: bool) -> Result<()> {
    let default_directive = if debug { "debug" } else { "info" };
    let filter = EnvFilter::builder()
        .with_default_directive(default_directive.parse().context("parse built in directive")?)
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(tracing_error::ErrorLayer::default())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_filter(filter))
        .try_init()
        .context("configure tracing")
}
