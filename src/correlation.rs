//! Invocation correlation table.
//!
//! Every `invoke` stores what was called under its sequence number so that a
//! later error envelope carrying the same `I` can be reported together with
//! the originating call. Entries live as long as the session; there is no
//! eviction.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sequence number used by the server when a frame references no invocation.
pub const NO_INVOCATION: i64 = -1;

/// What a single `invoke` call asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRecord {
    /// Hub the method was invoked on.
    pub hub_name: String,
    /// Remote method name.
    pub method: String,
    /// Ordered call arguments.
    pub data: Vec<Value>,
}

/// Sequence number → invocation record.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    records: HashMap<i64, InvocationRecord>,
}

impl CorrelationTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the call made under `sequence`, replacing any previous entry.
    pub fn record(&mut self, sequence: i64, hub: &str, method: &str, args: Vec<Value>) {
        self.records.insert(
            sequence,
            InvocationRecord {
                hub_name: hub.to_string(),
                method: method.to_string(),
                data: args,
            },
        );
    }

    /// Look up the call made under `sequence`.
    ///
    /// [`NO_INVOCATION`] and unknown sequence numbers yield `None`.
    #[must_use]
    pub fn lookup(&self, sequence: i64) -> Option<&InvocationRecord> {
        if sequence == NO_INVOCATION {
            return None;
        }
        self.records.get(&sequence)
    }

    /// Number of recorded invocations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
