//! Command grammar for lines and stations.
//!
//! Line: `START:<orderId>:<targetQty>[:<ppm>]` | `ACK` | `STOP`.
//! Station: `START` | `STOP` | `RESET` | `HOLD` | `SUSPEND` | `RESUME`.
//! Verbs are case-insensitive; order ids are kept verbatim but may not
//! contain field separators.

use thiserror::Error;

use crate::{LineId, OrderId, Phase, StationId};

#[derive(Debug, Clone, PartialEq)]
pub enum LineCommand {
    Start {
        order_id: OrderId,
        target_qty: u64,
        /// `0.0` selects the first station's nominal throughput.
        ppm: f64,
    },
    Ack,
    Stop,
}

/// Renders the wire form accepted by [`parse_line_command`].
impl std::fmt::Display for LineCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LineCommand::Start {
                order_id,
                target_qty,
                ppm,
            } => write!(f, "START:{order_id}:{target_qty}:{ppm}"),
            LineCommand::Ack => f.write_str("ACK"),
            LineCommand::Stop => f.write_str("STOP"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationCommand {
    Start,
    Stop,
    Reset,
    Hold,
    Suspend,
    Resume,
}

impl StationCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            StationCommand::Start => "START",
            StationCommand::Stop => "STOP",
            StationCommand::Reset => "RESET",
            StationCommand::Hold => "HOLD",
            StationCommand::Suspend => "SUSPEND",
            StationCommand::Resume => "RESUME",
        }
    }
}

/// Why a command was refused. Refusals never change state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("unknown command '{0}'")]
    Unknown(String),
    #[error("malformed command '{command}': {reason}")]
    Malformed { command: String, reason: String },
    #[error("line {line_id} is busy with order {order_id}")]
    Busy { line_id: LineId, order_id: OrderId },
    #[error("nothing is awaiting acknowledgment on line {0}")]
    NothingPending(LineId),
    #[error("unknown station '{0}'")]
    UnknownStation(String),
    #[error("station {station_id} cannot {command} while {phase}")]
    InvalidPhase {
        station_id: StationId,
        command: &'static str,
        phase: Phase,
    },
}

pub fn parse_line_command(raw: &str) -> Result<LineCommand, CommandError> {
    let trimmed = raw.trim();
    let mut parts = trimmed.split(':');
    let verb = parts.next().unwrap_or_default().to_ascii_uppercase();
    match verb.as_str() {
        "ACK" | "STOP" => {
            if parts.next().is_some() {
                return Err(malformed(trimmed, "takes no arguments"));
            }
            Ok(if verb == "ACK" {
                LineCommand::Ack
            } else {
                LineCommand::Stop
            })
        }
        "START" => {
            let fields: Vec<&str> = parts.map(str::trim).collect();
            parse_start(trimmed, &fields)
        }
        _ => Err(CommandError::Unknown(trimmed.to_string())),
    }
}

fn parse_start(command: &str, fields: &[&str]) -> Result<LineCommand, CommandError> {
    let (order, qty, ppm) = match fields {
        [order, qty] => (*order, *qty, None),
        [order, qty, ppm] => (*order, *qty, Some(*ppm)),
        _ => return Err(malformed(command, "expected START:<orderId>:<targetQty>:<ppm>")),
    };
    if let Err(reason) = check_order_id(order) {
        return Err(malformed(command, &reason));
    }
    let target_qty: u64 = qty
        .parse()
        .ok()
        .filter(|q| *q > 0)
        .ok_or_else(|| malformed(command, &format!("invalid target quantity '{qty}'")))?;
    let ppm = match ppm {
        None | Some("") => 0.0,
        Some(raw) => raw
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .ok_or_else(|| malformed(command, &format!("invalid throughput '{raw}'")))?,
    };
    Ok(LineCommand::Start {
        order_id: OrderId(order.to_string()),
        target_qty,
        ppm,
    })
}

pub fn parse_station_command(raw: &str) -> Result<StationCommand, CommandError> {
    let trimmed = raw.trim();
    match trimmed.to_ascii_uppercase().as_str() {
        "START" => Ok(StationCommand::Start),
        "STOP" => Ok(StationCommand::Stop),
        "RESET" => Ok(StationCommand::Reset),
        "HOLD" => Ok(StationCommand::Hold),
        "SUSPEND" => Ok(StationCommand::Suspend),
        "RESUME" => Ok(StationCommand::Resume),
        _ => Err(CommandError::Unknown(trimmed.to_string())),
    }
}

/// Characters that would split an id in the command grammar or a CSV row.
const RESERVED_ID_CHARS: [char; 5] = [':', ',', '"', '\n', '\r'];

/// True when `id` is non-empty and survives the command grammar and CSV
/// export unchanged.
pub fn is_plain_id(id: &str) -> bool {
    !id.is_empty() && !id.contains(RESERVED_ID_CHARS)
}

pub(crate) fn check_order_id(order_id: &str) -> Result<(), String> {
    if order_id.is_empty() {
        return Err("empty order id".to_string());
    }
    if !is_plain_id(order_id) {
        return Err(format!("order id '{}' contains a reserved character", order_id.escape_debug()));
    }
    Ok(())
}

fn malformed(command: &str, reason: &str) -> CommandError {
    CommandError::Malformed {
        command: command.to_string(),
        reason: reason.to_string(),
    }
}
