use std::fmt;

use serde::{Deserialize, Serialize};

/// A telemetry-type tag that determines which buffer an item lands in, its
/// rate-limit applicability, and (via [`Priority::of`]) its place in the
/// scheduler's weighted cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataCategory {
    Error,
    Transaction,
    Session,
    CheckIn,
    Log,
    Span,
    Profile,
    Replay,
    Feedback,
    ClientReport,
}

impl DataCategory {
    /// All categories that a delivery client maintains a buffer for.
    ///
    /// `ClientReport` is intentionally excluded: it is never buffered, only
    /// assembled on demand by the aggregator.
    pub const BUFFERED: &'static [DataCategory] = &[
        DataCategory::Error,
        DataCategory::Transaction,
        DataCategory::Session,
        DataCategory::CheckIn,
        DataCategory::Log,
        DataCategory::Span,
        DataCategory::Profile,
        DataCategory::Replay,
        DataCategory::Feedback,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DataCategory::Error => "error",
            DataCategory::Transaction => "transaction",
            DataCategory::Session => "session",
            DataCategory::CheckIn => "check_in",
            DataCategory::Log => "log",
            DataCategory::Span => "span",
            DataCategory::Profile => "profile",
            DataCategory::Replay => "replay",
            DataCategory::Feedback => "feedback",
            DataCategory::ClientReport => "client_report",
        }
    }

    /// Parses a category name as it appears in a rate-limit header or
    /// envelope item header. Unknown names are treated as `None` so callers
    /// can skip them the way `relay`'s header parser tolerates unknown scope
    /// tokens.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "error" => DataCategory::Error,
            "transaction" => DataCategory::Transaction,
            "session" => DataCategory::Session,
            "check_in" | "monitor" => DataCategory::CheckIn,
            "log" | "log_item" => DataCategory::Log,
            "span" => DataCategory::Span,
            "profile" => DataCategory::Profile,
            "replay" => DataCategory::Replay,
            "feedback" | "user_report_v2" => DataCategory::Feedback,
            "client_report" => DataCategory::ClientReport,
            _ => return None,
        })
    }

    /// The fixed, deterministic category-to-priority mapping referenced by
    /// section 3 of the spec.
    pub fn priority(self) -> Priority {
        match self {
            DataCategory::Error => Priority::Critical,
            DataCategory::Feedback => Priority::Critical,
            DataCategory::Transaction => Priority::High,
            DataCategory::CheckIn => Priority::High,
            DataCategory::Session => Priority::Medium,
            DataCategory::Log => Priority::Medium,
            DataCategory::Span => Priority::Low,
            DataCategory::Profile => Priority::Low,
            DataCategory::Replay => Priority::Lowest,
            DataCategory::ClientReport => Priority::Lowest,
        }
    }
}

impl fmt::Display for DataCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One of five scheduler weight tiers. See [`DataCategory::priority`] for the
/// fixed mapping and `PriorityWeights` (in `config`) for the per-tier weight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
    Lowest,
}

impl Priority {
    pub const ALL: [Priority; 5] = [
        Priority::Critical,
        Priority::High,
        Priority::Medium,
        Priority::Low,
        Priority::Lowest,
    ];
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
            Priority::Lowest => "lowest",
        };
        f.write_str(name)
    }
}
