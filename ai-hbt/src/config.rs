#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Knobs for `Template::compile_with`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CompileConfig {
    /// Weight given to children added without an explicit one.
    pub default_weight: u32,

    /// Max nesting depth before compilation gives up (recursion guard).
    pub max_depth: usize,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            default_weight: 100,
            max_depth: 256,
        }
    }
}

impl CompileConfig {
    pub fn with_default_weight(mut self, weight: u32) -> Self {
        self.default_weight = weight;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }
}
