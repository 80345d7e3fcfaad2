//! Tag-level read/write access, the shape field protocols expect.
//!
//! Writing `command` on the line id runs the line grammar, writing `command`
//! on a station id runs the station grammar, and any other write simply
//! overwrites the published value.

use thiserror::Error;

use crate::{CommandError, EventEnvelope, LineOrchestrator, TelemetryValue, WallMillis};

const COMMAND_TAG: &str = "command";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WriteError {
    #[error("unknown target '{0}'")]
    UnknownTarget(String),
    #[error("tag '{tag}' expects a text value, got {value}")]
    InvalidValue { tag: String, value: TelemetryValue },
    #[error(transparent)]
    Command(#[from] CommandError),
}

impl LineOrchestrator {
    pub fn read(&self, id: &str, tag: &str) -> Option<&TelemetryValue> {
        self.namespace().get(id, tag)
    }

    pub fn write(
        &mut self,
        id: &str,
        tag: &str,
        value: TelemetryValue,
        now_ms: WallMillis,
    ) -> Result<Vec<EventEnvelope>, WriteError> {
        if !self.owns(id) {
            return Err(WriteError::UnknownTarget(id.to_string()));
        }
        if tag != COMMAND_TAG {
            self.namespace_mut().publish(id, tag, value);
            return Ok(Vec::new());
        }
        let TelemetryValue::Text(raw) = value else {
            return Err(WriteError::InvalidValue {
                tag: tag.to_string(),
                value,
            });
        };
        let events = if id == self.id().0 {
            self.handle_command(&raw, now_ms)?
        } else {
            self.station_command(id, &raw, now_ms)?
        };
        Ok(events)
    }
}
