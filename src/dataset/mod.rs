pub mod channel;
pub mod csv;
pub mod stats;
pub mod tabular;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use channel::{ChannelData, Video};
pub use csv::{CsvDataset, SummaryOptions};
pub use tabular::Row;

/// Structured tool-level failure. Always returned as a value (serialized as
/// `{"error": ...}`) and relayed to the model as an ordinary tool result, so
/// the model can recover by asking the user or retrying with other arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolError {
    pub error: String,
}

impl ToolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}
