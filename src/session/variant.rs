use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Which provenance channels a session drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionVariant {
    /// Local snapshot only
    #[default]
    Local,
    /// Auto-commit, then local snapshot
    LocalAutoCommit,
    /// Local snapshot mirrored to a tracking run
    LocalTracking,
    /// Auto-commit and tracking run, no local directory
    CloudOnly,
}

impl SessionVariant {
    pub const ALL: [SessionVariant; 4] = [
        SessionVariant::Local,
        SessionVariant::LocalAutoCommit,
        SessionVariant::LocalTracking,
        SessionVariant::CloudOnly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionVariant::Local => "local",
            SessionVariant::LocalAutoCommit => "local-autocommit",
            SessionVariant::LocalTracking => "local-tracking",
            SessionVariant::CloudOnly => "cloud-only",
        }
    }

    pub fn snapshots_locally(&self) -> bool {
        !self.is_cloud_only()
    }

    pub fn auto_commits(&self) -> bool {
        matches!(self, SessionVariant::LocalAutoCommit | SessionVariant::CloudOnly)
    }

    pub fn tracks(&self) -> bool {
        matches!(self, SessionVariant::LocalTracking | SessionVariant::CloudOnly)
    }

    pub fn is_cloud_only(&self) -> bool {
        matches!(self, SessionVariant::CloudOnly)
    }
}

impl FromStr for SessionVariant {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|variant| variant.as_str() == value)
            .ok_or_else(|| {
                let known: Vec<_> = Self::ALL.iter().map(|v| v.as_str()).collect();
                format!("unknown session variant '{}' (expected one of: {})", value, known.join(", "))
            })
    }
}

impl std::fmt::Display for SessionVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
