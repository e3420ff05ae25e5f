//! Sneak32 link client - Main Entry Point

use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use sneak32_link::{
    DeviceSettings, LinkError, LinkEvent, Sneak32Service,
    config::{CliArgs, CliCommand, RuntimeConfig},
    transport::ble::BluerBackend,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> AppResult<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sneak32_link=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse CLI arguments
    let args = CliArgs::parse();
    info!(?args, "Starting Sneak32 link client");
    let config = RuntimeConfig::from(args);

    let backend = Arc::new(
        BluerBackend::new(
            config.adapter.as_deref(),
            config.device_filter.clone(),
            config.scan_timeout,
        )
        .await?,
    );
    let service = Sneak32Service::new(backend);

    let result = tokio::select! {
        result = run(&service, &config) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), shutting down");
            Ok(())
        }
        _ = shutdown_signal() => {
            info!("Received SIGTERM, shutting down");
            Ok(())
        }
    };

    if let Err(e) = service.disconnect().await {
        warn!("Disconnect failed: {}", e);
    }
    result
}

async fn run(service: &Sneak32Service<BluerBackend>, config: &RuntimeConfig) -> AppResult<()> {
    let Some(info) = service.connect().await? else {
        warn!("No device selected");
        return Ok(());
    };
    info!("Connected to {}", info.device_name);

    match &config.command {
        CliCommand::Info => emit(config, &info).await,
        CliCommand::WifiNetworks => emit(config, &service.request_wifi_networks().await?).await,
        CliCommand::WifiDevices => emit(config, &service.request_wifi_devices().await?).await,
        CliCommand::BleDevices => emit(config, &service.request_ble_devices().await?).await,
        CliCommand::Status => emit(config, &service.read_status().await?).await,
        CliCommand::Watch => watch(service).await,
        CliCommand::Settings => emit(config, &service.read_settings().await?).await,
        CliCommand::SetSettings { json } => {
            let settings: DeviceSettings = serde_json::from_str(json)?;
            service.update_settings(&settings).await?;
            emit(config, &service.read_settings().await?).await
        }
        CliCommand::Command { text } => emit(config, &service.send_command(text).await?).await,
        CliCommand::Save => emit(config, &service.save_data().await?).await,
        CliCommand::Clear => emit(config, &service.clear_data().await?).await,
        CliCommand::Restart => emit(config, &service.restart().await?).await,
        CliCommand::Mtu => emit(config, &service.negotiate_mtu().await).await,
    }
}

/// Print status updates until the link goes down
async fn watch(service: &Sneak32Service<BluerBackend>) -> AppResult<()> {
    let mut events = service.subscribe();
    println!("{}", serde_json::to_string(&service.read_status().await?)?);

    loop {
        match events.recv().await {
            Ok(LinkEvent::StatusUpdated(status)) => {
                println!("{}", serde_json::to_string(&status)?);
            }
            Ok(LinkEvent::Disconnected { unexpected: true }) => {
                error!("Connection to device lost");
                return Err(LinkError::LinkLost.into());
            }
            Ok(LinkEvent::Disconnected { unexpected: false }) | Err(RecvError::Closed) => {
                return Ok(());
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!("Skipped {} link events", skipped),
        }
    }
}

/// Write a result as JSON to the configured output
async fn emit<T: Serialize>(config: &RuntimeConfig, value: &T) -> AppResult<()> {
    let json = serde_json::to_string_pretty(value)?;
    match &config.output {
        Some(path) => {
            tokio::fs::write(path, json).await?;
            info!("Wrote result to {}", path);
        }
        None => println!("{}", json),
    }
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    // On non-Unix platforms, just wait forever
    std::future::pending::<()>().await
}
