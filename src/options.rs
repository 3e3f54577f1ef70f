//! Connection configuration.

use serde::{Deserialize, Serialize};

/// The queue size used when none, or zero, is configured.
pub const DEFAULT_QUEUE_SIZE: usize = 100;

/// Configuration for a [`Connection`](crate::connection::Connection).
///
/// Deserializable so it can be embedded in a host's configuration file:
///
/// ```
/// let options: tether::Options = serde_json::from_str(r#"{ "queueSize": 8 }"#).unwrap();
/// assert_eq!(options.queue_size(), 8);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Options {
    /// Capacity of the outbound queue serviced by the writer task.
    pub queue_size: usize,
}

impl Options {
    /// The effective queue capacity, substituting the default for zero.
    pub fn queue_size(&self) -> usize {
        if self.queue_size == 0 {
            DEFAULT_QUEUE_SIZE
        } else {
            self.queue_size
        }
    }
}

impl Default for Options {
    fn default() -> Self {
        Options {
            queue_size: DEFAULT_QUEUE_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_queue_size_falls_back_to_default() {
        let options = Options { queue_size: 0 };
        assert_eq!(options.queue_size(), DEFAULT_QUEUE_SIZE);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let options: Options = serde_json::from_str("{}").unwrap();
        assert_eq!(options, Options::default());
    }
}
