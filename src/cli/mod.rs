//! CLI argument parsing and validation module
//!
//! Handles command-line interface using clap:
//! - `run` starts the watchdog service
//! - `command`, `reload` and `status` talk to a running service over IPC
//! - `check-config` validates a kiosk config file offline

use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::time::Duration;

use kiosk_watchdog::constants::IPC_SOCKET_PATH;
use kiosk_watchdog::daemon::DaemonSettings;
use kiosk_watchdog::models::CommandEntry;

/// Parsed invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    pub verbose: bool,
    pub action: CliAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliAction {
    Run(DaemonSettings),
    Command {
        socket_path: PathBuf,
        entries: Vec<CommandEntry>,
    },
    Reload {
        socket_path: PathBuf,
    },
    Status {
        socket_path: PathBuf,
        json: bool,
    },
    CheckConfig {
        path: PathBuf,
    },
}

fn socket_arg() -> Arg {
    Arg::new("socket")
        .long("socket")
        .value_name("PATH")
        .help("Control socket of the running service")
        .default_value(IPC_SOCKET_PATH)
        .value_parser(clap::value_parser!(PathBuf))
}

fn build_cli() -> Command {
    Command::new("kiosk-watchdog")
        .version(env!("KIOSK_WATCHDOG_VERSION"))
        .about("Keep a kiosk application in the foreground")
        .long_about(
            "Background enforcement agent for single-purpose devices. Keeps the configured \
             target application in the foreground, kills other applications unless they are \
             temporarily whitelisted, and runs the scheduled reboot, wake and telemetry tasks.",
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable debug logging")
                .global(true)
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new("run")
                .about("Run the watchdog service in the foreground")
                .arg(
                    Arg::new("config")
                        .short('c')
                        .long("config")
                        .value_name("FILE")
                        .help("Kiosk config file (JSON)")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("token-file")
                        .long("token-file")
                        .value_name("FILE")
                        .help("File holding the persisted auth token")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("remote-poll-secs")
                        .long("remote-poll-secs")
                        .value_name("SECONDS")
                        .help("Remote app-status poll period")
                        .value_parser(clap::value_parser!(u64).range(1..)),
                )
                .arg(socket_arg()),
        )
        .subcommand(
            Command::new("command")
                .about("Send a command batch to the running service")
                .long_about(
                    "Send a command batch to the running service. Keys: add_whitelist \
                     (pkg:ms&pkg:ms), remove_whitelist (pkg), clear_whitelist, set_token (token).",
                )
                .arg(
                    Arg::new("entries")
                        .value_name("KEY=VALUE")
                        .help("Command entries, e.g. add_whitelist=com.game:60000")
                        .required(true)
                        .action(ArgAction::Append),
                )
                .arg(socket_arg()),
        )
        .subcommand(
            Command::new("reload")
                .about("Ask the running service to re-read its config file")
                .arg(socket_arg()),
        )
        .subcommand(
            Command::new("status")
                .about("Show the state of the running service")
                .arg(
                    Arg::new("json")
                        .short('j')
                        .long("json")
                        .help("Output in JSON format")
                        .action(ArgAction::SetTrue),
                )
                .arg(socket_arg()),
        )
        .subcommand(
            Command::new("check-config")
                .about("Parse a kiosk config file and report every problem")
                .arg(
                    Arg::new("path")
                        .value_name("FILE")
                        .help("Kiosk config file to check")
                        .required(true)
                        .value_parser(clap::value_parser!(PathBuf)),
                ),
        )
}

/// Parse command line arguments
pub fn parse_args() -> Result<CliArgs> {
    parse_matches(build_cli().get_matches())
}

fn parse_matches(matches: ArgMatches) -> Result<CliArgs> {
    let verbose = matches.get_flag("verbose");

    let action = match matches.subcommand() {
        Some(("run", sub)) => {
            let mut settings = DaemonSettings::default();
            if let Some(path) = sub.get_one::<PathBuf>("config") {
                settings.config_path = path.clone();
            }
            if let Some(path) = sub.get_one::<PathBuf>("token-file") {
                settings.token_path = path.clone();
            }
            if let Some(secs) = sub.get_one::<u64>("remote-poll-secs") {
                settings.remote_poll_interval = Duration::from_secs(*secs);
            }
            settings.socket_path = socket_path(sub);
            CliAction::Run(settings)
        }
        Some(("command", sub)) => {
            let entries = sub
                .get_many::<String>("entries")
                .into_iter()
                .flatten()
                .map(|raw| parse_entry(raw))
                .collect::<Result<Vec<_>>>()?;
            CliAction::Command {
                socket_path: socket_path(sub),
                entries,
            }
        }
        Some(("reload", sub)) => CliAction::Reload {
            socket_path: socket_path(sub),
        },
        Some(("status", sub)) => CliAction::Status {
            socket_path: socket_path(sub),
            json: sub.get_flag("json"),
        },
        Some(("check-config", sub)) => CliAction::CheckConfig {
            path: sub
                .get_one::<PathBuf>("path")
                .cloned()
                .ok_or_else(|| anyhow!("Missing config path"))?,
        },
        _ => return Err(anyhow!("No subcommand given")),
    };

    Ok(CliArgs { verbose, action })
}

fn socket_path(matches: &ArgMatches) -> PathBuf {
    matches
        .get_one::<PathBuf>("socket")
        .cloned()
        .unwrap_or_else(|| PathBuf::from(IPC_SOCKET_PATH))
}

/// `KEY=VALUE`, split on the first `=`. A bare key gets an empty value.
fn parse_entry(raw: &str) -> Result<CommandEntry> {
    let (key, value) = raw.split_once('=').unwrap_or((raw, ""));
    if key.is_empty() {
        return Err(anyhow!("Command entry '{}' has no key", raw));
    }
    Ok(CommandEntry::new(key, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<CliArgs> {
        parse_matches(build_cli().try_get_matches_from(args)?)
    }

    #[test]
    fn test_command_entries_keep_value_verbatim() {
        let args = parse(&[
            "kiosk-watchdog",
            "command",
            "add_whitelist=com.a:1000&com.b:2000",
            "clear_whitelist",
        ])
        .unwrap();

        match args.action {
            CliAction::Command { entries, socket_path } => {
                assert_eq!(socket_path, PathBuf::from(IPC_SOCKET_PATH));
                assert_eq!(
                    entries,
                    vec![
                        CommandEntry::new("add_whitelist", "com.a:1000&com.b:2000"),
                        CommandEntry::new("clear_whitelist", ""),
                    ]
                );
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_empty_key_is_rejected() {
        assert!(parse(&["kiosk-watchdog", "command", "=value"]).is_err());
    }

    #[test]
    fn test_run_overrides() {
        let args = parse(&[
            "kiosk-watchdog",
            "run",
            "--config",
            "/tmp/cfg.json",
            "--remote-poll-secs",
            "30",
            "-v",
        ])
        .unwrap();

        assert!(args.verbose);
        match args.action {
            CliAction::Run(settings) => {
                assert_eq!(settings.config_path, PathBuf::from("/tmp/cfg.json"));
                assert_eq!(settings.remote_poll_interval, Duration::from_secs(30));
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        assert!(parse(&["kiosk-watchdog", "run", "--remote-poll-secs", "0"]).is_err());
    }
}
