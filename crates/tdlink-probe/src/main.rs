//! # tdlink Probe
//!
//! Opens one client, aligns the engine's log verbosity with ours, runs the
//! fixed request corpus, then shuts the client down gracefully. Exits
//! non-zero if any call failed.
//!
//! Configuration comes from the environment (`TDLINK_*`, see
//! `ClientConfig::from_env` and `TelemetryConfig::from_env`).

use anyhow::{Context, Result};
use std::fmt::Debug;
use tdlink::methods::{
    GetOption, SetLogVerbosityLevel, TestCallEmpty, TestCallString, TestCallVectorInt,
    TestSquareInt,
};
use tdlink::{ClientConfig, ClientHandle, ClientManager, ClientResult, Engine, UpdateFilter};
use tdlink_telemetry::{engine_verbosity, init_tracing, log_client_event, log_event, TelemetryConfig};

#[cfg(not(feature = "tdjson"))]
fn engine() -> tdlink::adapters::MemoryEngine {
    tdlink::adapters::MemoryEngine::new()
}

#[cfg(feature = "tdjson")]
fn engine() -> tdlink::adapters::TdJsonEngine {
    tdlink::adapters::TdJsonEngine::new()
}

/// Log one call's outcome; returns true on success.
fn report<T: Debug>(handle: ClientHandle, method: &str, result: ClientResult<T>) -> bool {
    match result {
        Ok(response) => {
            log_client_event!(info, "probe", "Call succeeded", handle, method = method, response = ?response);
            true
        }
        Err(e) => {
            log_client_event!(error, "probe", "Call failed", handle, method = method, error = %e);
            false
        }
    }
}

async fn run_corpus<E: Engine>(manager: &ClientManager<E>, handle: ClientHandle) -> usize {
    let outcomes = [
        report(
            handle,
            "testCallEmpty",
            manager.call(handle, &TestCallEmpty {}, None).await,
        ),
        report(
            handle,
            "testCallString",
            manager
                .call(handle, &TestCallString { x: "tdlink".into() }, None)
                .await,
        ),
        report(
            handle,
            "testSquareInt",
            manager.call(handle, &TestSquareInt { x: 12 }, None).await,
        ),
        report(
            handle,
            "testCallVectorInt",
            manager
                .call(handle, &TestCallVectorInt { x: vec![1, 2, 3] }, None)
                .await,
        ),
        report(
            handle,
            "getOption",
            manager
                .call(handle, &GetOption { name: "version".into() }, None)
                .await,
        ),
    ];
    outcomes.iter().filter(|ok| !**ok).count()
}

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = TelemetryConfig::from_env().for_service("tdlink-probe");
    init_tracing(&telemetry)?;

    let config = ClientConfig::from_env().context("invalid client configuration")?;
    let manager = ClientManager::new(engine(), config)?;

    let verbosity = engine_verbosity(telemetry.max_level());
    match manager.execute_method(&SetLogVerbosityLevel {
        new_verbosity_level: verbosity,
    }) {
        Ok(_) => log_event!(debug, "probe", "Engine verbosity set", verbosity = verbosity),
        Err(e) => log_event!(warn, "probe", "Could not set engine verbosity", error = %e),
    }

    let handle = manager.open().context("failed to open a client")?;
    let mut updates = manager.subscribe(handle, UpdateFilter::all())?;
    let watcher = tokio::spawn(async move {
        let mut seen = 0u64;
        while let Some(delivery) = updates.recv().await {
            seen += 1;
            log_event!(
                debug,
                "probe",
                "Update received",
                kind = delivery.update.kind(),
                dropped_before = delivery.dropped_before
            );
        }
        seen
    });

    let failures = run_corpus(&manager, handle).await;

    manager.shutdown(handle, None).await?;
    let updates_seen = watcher.await?;

    log_event!(
        info,
        "probe",
        "Probe finished",
        failures = failures,
        updates = updates_seen
    );
    if failures > 0 {
        anyhow::bail!("{failures} probe calls failed");
    }
    Ok(())
}
