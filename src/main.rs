// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! session-probe: exercise the session coordinator against a live project.
//!
//! Usage:
//!   session-probe status
//!   session-probe signup <email> <password> [display name]
//!   session-probe login <email> <password> [--remember]
//!   session-probe logout
//!   session-probe reset <email>

use anyhow::{bail, Context};
use session_telemetry::{config::Config, init_logging, models::params, SessionServices};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("status");

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(project = %config.project_id, command, "Starting session-probe");

    let services = SessionServices::connect(config).await?;
    let coordinator = &services.coordinator;
    let initial = coordinator.wait_until_resolved().await;
    tracing::info!(signed_in = initial.principal().is_some(), "Session resolved");

    services.telemetry.record_page_view(&format!("/probe/{}", command));

    match (command, args.get(1..).unwrap_or_default()) {
        ("status", _) => {}
        ("signup", [email, password, rest @ ..]) => {
            let name = (!rest.is_empty()).then(|| rest.join(" "));
            coordinator.signup(email, password, name.as_deref()).await?;
        }
        ("login", [email, password, rest @ ..]) => {
            let remember = rest.iter().any(|a| a == "--remember");
            coordinator.login(email, password, remember).await?;
        }
        ("logout", _) => coordinator.logout().await?,
        ("reset", [email]) => coordinator.reset_password(email).await?,
        _ => bail!("unrecognized command: {}", args.join(" ")),
    }

    if let Some(principal) = coordinator.current_principal() {
        services.telemetry.set_user_identifier(&principal.uid);
    }
    services
        .telemetry
        .record_event("probe_complete", params([("command", command)]));

    println!("{}", serde_json::to_string_pretty(&coordinator.snapshot())?);

    coordinator.shutdown();
    Ok(())
}
