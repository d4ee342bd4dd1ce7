//! Outcome of one successful turn.

use crate::error::{ContextError, Result};
use crate::script::Value;
use crate::store::ContextStore;
use std::time::Duration;

/// Return value, captured console output, and the context snapshot taken
/// after the turn.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    value: Value,
    output: String,
    context: ContextStore,
    elapsed: Duration,
}

impl ExecutionResult {
    pub(crate) fn new(value: Value, output: String, context: ContextStore, elapsed: Duration) -> Self {
        Self {
            value,
            output,
            context,
            elapsed,
        }
    }

    /// The turn's value; `None` when it produced nil.
    pub fn return_value(&self) -> Option<&Value> {
        (!self.value.is_nil()).then_some(&self.value)
    }

    /// The return value as plain JSON, for callers outside the runtime.
    pub fn return_json(&self) -> Result<Option<serde_json::Value>> {
        let Some(value) = self.return_value() else {
            return Ok(None);
        };
        value
            .to_json()
            .map(Some)
            .map_err(|reason| ContextError::NotSerializable {
                name: "return value".to_string(),
                reason,
            })
    }

    /// Everything printed during the turn.
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn context(&self) -> &ContextStore {
        &self.context
    }

    /// Take the snapshot, typically to join into the next turn's store.
    pub fn into_context(self) -> ContextStore {
        self.context
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}
