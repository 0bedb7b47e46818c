#![forbid(unsafe_code)]

mod cli;

use anyhow::{anyhow, Result};
use std::path::Path;

use cli::{CliAction, CliArgs};
use kiosk_watchdog::daemon::config::load_config;
use kiosk_watchdog::daemon::ipc::{IpcClient, IpcMessage, IpcResponse};
use kiosk_watchdog::daemon::logging::init_logging;
use kiosk_watchdog::daemon::run_daemon;
use kiosk_watchdog::models::StatusReport;
use kiosk_watchdog::platform::FileConfigSource;

#[tokio::main]
async fn main() -> Result<()> {
    let CliArgs { verbose, action } = cli::parse_args()?;
    init_logging(verbose)?;

    match action {
        CliAction::Run(settings) => run_daemon(settings).await,
        CliAction::Command {
            socket_path,
            entries,
        } => {
            let response = IpcClient::new(socket_path)
                .send(&IpcMessage::command(entries))
                .await?;
            print_response(response)
        }
        CliAction::Reload { socket_path } => {
            let response = IpcClient::new(socket_path)
                .send(&IpcMessage::reload())
                .await?;
            print_response(response)
        }
        CliAction::Status { socket_path, json } => {
            let response = IpcClient::new(socket_path)
                .send(&IpcMessage::status())
                .await?;
            print_status(response, json)
        }
        CliAction::CheckConfig { path } => check_config(&path),
    }
}

fn print_response(response: IpcResponse) -> Result<()> {
    match response {
        IpcResponse::Success { message, data, .. } => {
            if let Some(message) = message {
                println!("{}", message);
            }
            if let Some(data) = data {
                println!("{}", serde_json::to_string_pretty(&data)?);
            }
            Ok(())
        }
        IpcResponse::Error {
            code,
            message,
            details,
            ..
        } => Err(anyhow!(
            "Daemon returned error {}: {}{}",
            code,
            message,
            details.map(|d| format!(" ({})", d)).unwrap_or_default()
        )),
    }
}

fn print_status(response: IpcResponse, json: bool) -> Result<()> {
    let data = match response {
        IpcResponse::Success { data: Some(data), .. } => data,
        other => return print_response(other),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    let status: StatusReport = serde_json::from_value(data)?;
    println!("kiosk-watchdog {} (pid {})", status.version, status.pid);
    println!("  Uptime:          {}s", status.uptime_seconds);
    println!(
        "  Config:          {} ({})",
        status.config_path.display(),
        if status.config_loaded { "loaded" } else { "fallback" }
    );
    println!("  Lifecycle:       {}", status.lifecycle);
    println!(
        "  Last foreground: {}",
        status.last_foreground_app.as_deref().unwrap_or("-")
    );
    println!("  Token:           {}", if status.token_present { "set" } else { "not set" });
    for (label, at) in [
        ("Next reboot:    ", status.next_reboot_at),
        ("Next wakeup:    ", status.next_wakeup_at),
        ("Next runtime:   ", status.next_runtime_send_at),
    ] {
        if let Some(at) = at {
            println!("  {} {}", label, at.to_rfc3339());
        }
    }
    if status.whitelist.is_empty() {
        println!("  Whitelist:       empty");
    } else {
        println!("  Whitelist:");
        for entry in &status.whitelist {
            println!("    {} ({}ms left)", entry.package, entry.remaining_ms);
        }
    }
    for error in &status.config_errors {
        println!("  Config error:    {}", error);
    }
    Ok(())
}

/// Exit non-zero only when the file cannot be used at all
fn check_config(path: &Path) -> Result<()> {
    let config = load_config(&FileConfigSource, path)?;

    println!("{}", config);
    if config.has_errors() {
        println!("{} problem(s):", config.errors.len());
        for error in &config.errors {
            println!("  - {}", error);
        }
    } else {
        println!("No problems found");
    }
    Ok(())
}
