//! Reuse of the global system across time steps.
use serde::{Deserialize, Serialize};

/// Controls how the global system is reused across time steps.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SystemSettings {
    /// Keep the matrix and vectors alive between steps.
    pub save_system: bool,
    /// Reassemble the matrix every step even when the system is kept.
    pub update_a: bool,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            save_system: true,
            update_a: false,
        }
    }
}

impl SystemSettings {
    /// Whether an insertion must write matrix coefficients, or only the right-hand side.
    pub fn requires_matrix_assembly(&self, first_step: bool) -> bool {
        first_step || self.update_a || !self.save_system
    }
}
