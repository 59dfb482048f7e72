//! Interactive device commands
//!
//! Lines typed at the `--interactive` prompt stand in for a real device:
//!
//! ```text
//! face 1                     one frame with one face
//! fix 52.37 4.89 12.5        GPS fix: latitude longitude accuracy_m
//! nofix                      location tick without a fix
//! allow | deny | unavailable permission answer
//! fire                       manual verify
//! status                     print the latest status
//! quit                       unmount and exit
//! ```

use lazy_static::lazy_static;
use regex::Regex;
use crate::core::capability::PermissionAnswer;
use crate::types::{LocationFix, RawSignal};

lazy_static! {
    static ref RE_FACE: Regex = Regex::new(r"(?i)^faces?\s+(\d+)$").unwrap();

    static ref RE_FIX: Regex = Regex::new(
        r"(?i)^fix\s+(-?\d+(?:\.\d+)?)\s+(-?\d+(?:\.\d+)?)\s+(\d+(?:\.\d+)?)$"
    ).unwrap();

    static ref RE_WORD: Regex = Regex::new(r"(?i)^(nofix|allow|deny|unavailable|fire|status|quit|exit)$").unwrap();
}

/// One parsed prompt line
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    Signal(RawSignal),
    Permission(PermissionAnswer),
    Fire,
    Status,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("unknown command: {0}")]
    Unknown(String),

    #[error("bad {command} arguments: {detail}")]
    BadArguments { command: &'static str, detail: String },
}

impl DeviceCommand {
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(CommandError::Empty);
        }

        if let Some(caps) = RE_FACE.captures(line) {
            let count = caps[1].parse::<u32>().map_err(|e| CommandError::BadArguments {
                command: "face",
                detail: e.to_string(),
            })?;
            return Ok(DeviceCommand::Signal(RawSignal::faces(count)));
        }

        if let Some(caps) = RE_FIX.captures(line) {
            let number = |i: usize| {
                caps[i].parse::<f64>().map_err(|e| CommandError::BadArguments {
                    command: "fix",
                    detail: e.to_string(),
                })
            };
            let fix = LocationFix {
                latitude: number(1)?,
                longitude: number(2)?,
                accuracy_m: number(3)?,
            };
            if !fix.is_valid() {
                return Err(CommandError::BadArguments {
                    command: "fix",
                    detail: format!("{}, {} ±{}m is not a valid fix", fix.latitude, fix.longitude, fix.accuracy_m),
                });
            }
            return Ok(DeviceCommand::Signal(RawSignal::location(Some(fix))));
        }

        if let Some(caps) = RE_WORD.captures(line) {
            return Ok(match caps[1].to_lowercase().as_str() {
                "nofix" => DeviceCommand::Signal(RawSignal::location(None)),
                "allow" => DeviceCommand::Permission(PermissionAnswer::Granted),
                "deny" => DeviceCommand::Permission(PermissionAnswer::Denied),
                "unavailable" => DeviceCommand::Permission(PermissionAnswer::Unavailable),
                "fire" => DeviceCommand::Fire,
                "status" => DeviceCommand::Status,
                _ => DeviceCommand::Quit,
            });
        }

        Err(CommandError::Unknown(line.to_string()))
    }
}
