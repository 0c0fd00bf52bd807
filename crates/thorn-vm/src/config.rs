//! Runtime configuration.

use serde::{Deserialize, Serialize};

/// Per-runtime limits and options.
///
/// Deserializable so hosts can keep it in a config file; missing fields take
/// their defaults.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Instruction budget per top-level invocation (dispatched opcodes plus calls).
    pub max_instructions: u64,
    /// Maximum number of nested script frames.
    pub max_call_depth: usize,
    /// Install the builtin library into new environments.
    pub stdlib: bool,
    /// Objects plus strings allocated before a collection runs at the end of
    /// an invocation. 0 leaves collection to the host.
    pub gc_threshold: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            max_instructions: 1_000_000,
            max_call_depth: 200,
            stdlib: true,
            gc_threshold: 10_000,
        }
    }
}
