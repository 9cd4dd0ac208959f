//! Agent API versions and the capabilities each one unlocks.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ApiVersion {
    V2,
    V3,
    V4,
    /// Anything an agent sent that we do not speak.
    Unknown(String),
}

impl ApiVersion {
    pub const SUPPORTED: [ApiVersion; 3] = [ApiVersion::V2, ApiVersion::V3, ApiVersion::V4];

    pub fn parse(raw: &str) -> Self {
        match raw {
            "2.0" => ApiVersion::V2,
            "3.0" => ApiVersion::V3,
            "4.0" => ApiVersion::V4,
            other => ApiVersion::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ApiVersion::V2 => "2.0",
            ApiVersion::V3 => "3.0",
            ApiVersion::V4 => "4.0",
            ApiVersion::Unknown(raw) => raw,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, ApiVersion::Unknown(_))
    }

    /// v2 agents do the whole backup during preparation; only v3+ have a separate execution stage.
    pub fn supports_backup_execution(&self) -> bool {
        matches!(self, ApiVersion::V3 | ApiVersion::V4)
    }

    pub fn supports_fragment_list(&self) -> bool {
        matches!(self, ApiVersion::V4)
    }

    pub fn supports_semantic_version(&self) -> bool {
        matches!(self, ApiVersion::V4)
    }

    /// A v2 agent is done after preparation, so the job may reset it from there.
    pub fn supports_prepare_reset(&self) -> bool {
        matches!(self, ApiVersion::V2)
    }
}

impl std::fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ApiVersion {
    fn from(raw: String) -> Self {
        ApiVersion::parse(&raw)
    }
}

impl From<ApiVersion> for String {
    fn from(version: ApiVersion) -> Self {
        version.as_str().to_string()
    }
}
