// Forbid unwrap() in production code to prevent panics from corrupt data.
// Test code is allowed to use unwrap() for convenience.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
use std::sync::Arc;

use locksim::config::SimulationConfig;
use locksim::simulation::{
    InvariantChecker, OptimisticDriver, PessimisticDriver, SimulationResult, TransactionDriver,
    TransactionReport, WriteMode,
};
use locksim::store::StoreError;
use locksim::types::Record;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Serialize)]
struct RunReport {
    simulations: Vec<SimulationResult>,
    transactions: Vec<TransactionReport>,
    violations: Vec<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "locksim=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment variables
    let config = match SimulationConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        "Loaded configuration: max_name_length={}, lock_wait={:?}, start_order={:?}",
        config.max_name_length,
        config.lock_wait,
        config.start_order
    );

    let report = match run(&config).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("Simulation failed: {e}");
            std::process::exit(1);
        }
    };

    if config.report_json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                tracing::error!("Failed to serialize results: {e}");
                std::process::exit(1);
            }
        }
    }

    if !report.violations.is_empty() {
        for violation in &report.violations {
            tracing::error!("Invariant violated: {violation}");
        }
        std::process::exit(1);
    }

    tracing::info!("All invariants held");
}

async fn run(config: &SimulationConfig) -> Result<RunReport, StoreError> {
    // Separate stores: the two protocols never touch each other's record.
    let pessimistic = PessimisticDriver::from_config(Arc::new(config.store()), config);
    let optimistic = OptimisticDriver::from_config(Arc::new(config.store()), config);

    let (pessimistic, optimistic) = tokio::join!(
        pessimistic.run(Record::new("321", "X")),
        optimistic.run(Record::new("123", "Y")),
    );
    let simulations = vec![pessimistic?, optimistic?];

    let mut checker = InvariantChecker::new();
    for result in &simulations {
        log_result(result);
        checker.check(result);
    }

    let mut transactions = TransactionDriver::new(Arc::new(config.store()), config.seed);
    let mut reports = Vec::with_capacity(2);
    for mode in [WriteMode::Autocommit, WriteMode::Transactional] {
        let report = transactions.run(mode).await?;
        tracing::info!(
            ?mode,
            attempted = report.attempted.len(),
            persisted = report.persisted.len(),
            "transaction demo finished"
        );
        reports.push(report);
    }

    Ok(RunReport {
        simulations,
        transactions: reports,
        violations: checker
            .violations()
            .iter()
            .map(ToString::to_string)
            .collect(),
    })
}

fn log_result(result: &SimulationResult) {
    for event in &result.events {
        tracing::debug!(
            protocol = ?result.protocol,
            worker = %event.worker_name,
            phase = ?event.phase,
            at_ms = event.timestamp_ms,
            "event"
        );
    }
    for report in &result.reports {
        tracing::info!(
            protocol = ?result.protocol,
            worker = %report.name,
            outcome = ?report.outcome,
            elapsed_ms = report.elapsed_ms(),
            "worker finished"
        );
    }
    if let Some(record) = &result.final_record {
        tracing::info!(
            protocol = ?result.protocol,
            record = %record.id,
            name = %record.name,
            version = record.version,
            "final record"
        );
    }
}
