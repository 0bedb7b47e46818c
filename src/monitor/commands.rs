//! External command batches
//!
//! A batch is a list of key/value strings. Every key is handled on its own:
//! a bad key or a bad `add_whitelist` segment is skipped and reported, the
//! rest of the batch still applies.

use super::session::SessionState;
use crate::daemon::logging::WatchdogLogger;
use crate::models::{BatchSummary, CommandEntry};
use crate::platform::TokenStore;

pub const ADD_WHITELIST: &str = "add_whitelist";
pub const REMOVE_WHITELIST: &str = "remove_whitelist";
pub const CLEAR_WHITELIST: &str = "clear_whitelist";
pub const SET_TOKEN: &str = "set_token";

/// Separator between `package:duration` pairs
const PAIR_DELIMITER: char = '&';
const DURATION_DELIMITER: char = ':';

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("'{0}' is not a package:duration pair")]
    MalformedPair(String),
    #[error("duration '{value}' for {package} is not a number of milliseconds")]
    InvalidDuration { package: String, value: String },
    #[error("unhandled key '{key}' with value '{value}'")]
    UnknownKey { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhitelistGrant {
    pub package: String,
    pub duration_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchdogCommand {
    AddWhitelist(Vec<WhitelistGrant>),
    RemoveWhitelist(String),
    ClearWhitelist,
    SetToken(String),
}

impl WatchdogCommand {
    /// Parse one entry. For `add_whitelist` the bad segments come back alongside
    /// the grants that did parse.
    pub fn parse(entry: &CommandEntry) -> Result<(Self, Vec<CommandError>), CommandError> {
        let command = match entry.key.as_str() {
            ADD_WHITELIST => {
                let (grants, rejected) = parse_grants(&entry.value);
                return Ok((WatchdogCommand::AddWhitelist(grants), rejected));
            }
            REMOVE_WHITELIST => WatchdogCommand::RemoveWhitelist(entry.value.clone()),
            CLEAR_WHITELIST => WatchdogCommand::ClearWhitelist,
            SET_TOKEN => WatchdogCommand::SetToken(entry.value.clone()),
            _ => {
                return Err(CommandError::UnknownKey {
                    key: entry.key.clone(),
                    value: entry.value.clone(),
                })
            }
        };
        Ok((command, Vec::new()))
    }
}

/// Split `pkg:ms&pkg:ms`. The duration is taken after the last `:` so
/// package identifiers containing `:` survive.
pub fn parse_grants(value: &str) -> (Vec<WhitelistGrant>, Vec<CommandError>) {
    let mut grants = Vec::new();
    let mut rejected = Vec::new();

    for segment in value.split(PAIR_DELIMITER).filter(|s| !s.is_empty()) {
        let Some((package, duration)) = segment.rsplit_once(DURATION_DELIMITER) else {
            rejected.push(CommandError::MalformedPair(segment.to_string()));
            continue;
        };
        if package.is_empty() {
            rejected.push(CommandError::MalformedPair(segment.to_string()));
            continue;
        }

        match duration.trim().parse::<i64>() {
            Ok(duration_ms) => grants.push(WhitelistGrant {
                package: package.to_string(),
                duration_ms,
            }),
            Err(_) => rejected.push(CommandError::InvalidDuration {
                package: package.to_string(),
                value: duration.to_string(),
            }),
        }
    }

    (grants, rejected)
}

/// Apply a batch against the session at `now` (ms since epoch).
///
/// The caller holds the session lock for the whole batch.
pub fn apply_batch(
    entries: &[CommandEntry],
    session: &mut SessionState,
    tokens: &dyn TokenStore,
    now: i64,
    logger: &WatchdogLogger,
) -> BatchSummary {
    let mut summary = BatchSummary::default();

    for entry in entries {
        log::info!("Processing command key: {} value: {}", entry.key, redact(entry));

        let (command, rejected) = match WatchdogCommand::parse(entry) {
            Ok(parsed) => parsed,
            Err(err) => {
                logger.log_error(&err.to_string(), Some("command"));
                summary.skipped.push(err.to_string());
                continue;
            }
        };
        for err in rejected {
            log::warn!("Skipping {} segment: {}", ADD_WHITELIST, err);
            summary.skipped.push(err.to_string());
        }

        apply(command, session, tokens, now, logger);
        summary.applied.push(entry.key.clone());
    }

    summary
}

fn apply(
    command: WatchdogCommand,
    session: &mut SessionState,
    tokens: &dyn TokenStore,
    now: i64,
    logger: &WatchdogLogger,
) {
    match command {
        WatchdogCommand::AddWhitelist(grants) => {
            for grant in grants {
                session.whitelist.add(&grant.package, now, grant.duration_ms);
                logger.log_command(
                    ADD_WHITELIST,
                    &format!("{} for {}ms", grant.package, grant.duration_ms),
                );
            }
        }
        WatchdogCommand::RemoveWhitelist(package) => {
            let present = session.whitelist.remove(&package);
            let detail = if present {
                package
            } else {
                format!("{} (not whitelisted)", package)
            };
            logger.log_command(REMOVE_WHITELIST, &detail);
        }
        WatchdogCommand::ClearWhitelist => {
            let dropped = session.whitelist.clear();
            logger.log_command(CLEAR_WHITELIST, &format!("{} entries dropped", dropped));
        }
        WatchdogCommand::SetToken(token) => {
            // The in-memory token is updated even when persisting fails
            if let Err(err) = tokens.persist(&token) {
                logger.log_error(&format!("Failed to persist token: {}", err), Some(SET_TOKEN));
            }
            session.auth_token = Some(token);
            logger.log_command(SET_TOKEN, "token updated");
        }
    }
}

fn redact(entry: &CommandEntry) -> &str {
    if entry.key == SET_TOKEN {
        "<redacted>"
    } else {
        &entry.value
    }
}
