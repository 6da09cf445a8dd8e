//! Backend status snapshot
//!
//! Summarizes what initialization found: which capabilities resolved and
//! what the derived session flags are. Serializable for `--format json`.

use crate::capability::{Capability, CapabilityTable};
use crate::record_replay::SessionFlags;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Resolution outcome for a single capability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityStatus {
    /// Short name (e.g., "feature-enabled")
    pub name: String,
    /// Exported symbol name (e.g., "RecordReplayFeatureEnabled")
    pub symbol: String,
    pub resolved: bool,
}

/// Snapshot of the backend as seen by one facade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendStatus {
    /// True iff the assert capability resolved
    pub usable: bool,
    /// A recording or replaying session is in progress
    pub active: bool,
    /// The session disables some features selectively
    pub has_disabled_features: bool,
    pub capabilities: Vec<CapabilityStatus>,
}

impl BackendStatus {
    pub(crate) fn from_table(table: &CapabilityTable, flags: SessionFlags, usable: bool) -> Self {
        BackendStatus {
            usable,
            active: flags.active,
            has_disabled_features: flags.has_disabled_features,
            capabilities: Capability::ALL
                .iter()
                .map(|&capability| CapabilityStatus {
                    name: capability.label().to_string(),
                    symbol: capability.symbol_name().to_string(),
                    resolved: table.is_resolved(capability),
                })
                .collect(),
        }
    }

    /// Status with nothing resolved
    pub fn unavailable() -> Self {
        Self::from_table(&CapabilityTable::absent(), SessionFlags::default(), false)
    }

    pub fn resolved_count(&self) -> usize {
        self.capabilities.iter().filter(|c| c.resolved).count()
    }

    /// Capabilities that did not resolve
    pub fn missing(&self) -> impl Iterator<Item = &CapabilityStatus> {
        self.capabilities.iter().filter(|c| !c.resolved)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable report
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let yes_no = |flag: bool| if flag { "yes" } else { "no" };

        let _ = writeln!(
            out,
            "Record/replay backend: {}",
            if self.usable { "usable" } else { "unavailable" }
        );
        let _ = writeln!(out, "  session active:        {}", yes_no(self.active));
        let _ = writeln!(
            out,
            "  has disabled features: {}",
            yes_no(self.has_disabled_features)
        );
        let _ = writeln!(
            out,
            "Capabilities ({}/{} resolved):",
            self.resolved_count(),
            self.capabilities.len()
        );
        for capability in &self.capabilities {
            let _ = writeln!(
                out,
                "  [{}] {:<36} {}",
                if capability.resolved { "x" } else { " " },
                capability.symbol,
                capability.name
            );
        }
        out
    }
}
