//! `qc-intkey-processor` entry point.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use qc_18_transaction_processor::{Termination, TransactionProcessor};
use qc_intkey_processor::{Args, IntkeyHandler, FAMILY_NAME};
use quantum_telemetry::{default_config_dir, init_telemetry};
use shared_crypto::namespace_prefix;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Transaction processor exiting");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode> {
    let args = Args::parse();

    let config = args.processor_config()?;
    let processor = TransactionProcessor::new(&args.endpoint, config)
        .with_context(|| format!("Invalid endpoint {}", args.endpoint))?;

    let telemetry = args.telemetry_config(processor.id(), &default_config_dir())?;
    let logging = init_telemetry(&telemetry).context("Failed to initialize telemetry")?;
    if let Some(path) = &logging.log_file {
        info!(log_file = %path.display(), "Logging to file");
    }

    let prefix = namespace_prefix(FAMILY_NAME);
    info!(family = FAMILY_NAME, prefix = %prefix, endpoint = %args.endpoint, "Registering handler");
    processor.add_handler(IntkeyHandler::new(prefix))?;

    // Ctrl-C during the connect and registration retries stops cleanly.
    let started = tokio::select! {
        result = processor.start() => Some(result),
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for interrupt")?;
            None
        }
    };
    match started {
        Some(result) => result.context("Transaction processor failed to start")?,
        None => {
            info!("Interrupt received during startup, stopping");
            processor.stop().await;
            return Ok(ExitCode::SUCCESS);
        }
    }

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for interrupt")?;
            info!("Interrupt received, stopping");
            processor.stop().await;
            Ok(ExitCode::SUCCESS)
        }
        termination = processor.wait_terminated() => match termination {
            Termination::Requested => Ok(ExitCode::SUCCESS),
            Termination::Failed(reason) => {
                error!(reason = %reason, "Transaction processor terminated");
                Ok(ExitCode::FAILURE)
            }
        },
    }
}
