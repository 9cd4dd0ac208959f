//! Registration data of a recognized agent.

use serde::{Deserialize, Serialize};

use crate::agent::api_version::ApiVersion;
use crate::error::{OrchestratorError, Result};
use crate::ids::validate_id;
use crate::protocol::{Register, SoftwareVersionInfo};

/// Identity an agent announced when it registered. Shared by every state the agent goes through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub agent_id: String,
    pub api_version: ApiVersion,
    pub scope: String,
    pub software_version_info: SoftwareVersionInfo,
}

impl Registration {
    /// Validates a register message, reporting every broken rule at once.
    pub fn validate(register: &Register) -> Result<Self> {
        let mut reasons = Vec::new();

        let api_version = ApiVersion::parse(&register.api_version);
        if !api_version.is_supported() {
            let supported: Vec<String> = ApiVersion::SUPPORTED.iter().map(ApiVersion::to_string).collect();
            reasons.push(format!(
                "Invalid api version <{}>. Only {:?} are supported.",
                register.api_version, supported
            ));
        }

        if let Err(e) = validate_id(&register.agent_id) {
            reasons.push(e.to_string());
        }

        if has_invalid_software_version(&register.software_version_info) {
            reasons.push("Software version information is invalid.".to_string());
        }

        if !reasons.is_empty() {
            return Err(OrchestratorError::InvalidRegistration(reasons));
        }

        Ok(Self::from_register_unchecked(register))
    }

    /// Builds registration data without validation.
    pub fn from_register_unchecked(register: &Register) -> Self {
        Self {
            agent_id: register.agent_id.clone(),
            api_version: ApiVersion::parse(&register.api_version),
            scope: register.scope.clone(),
            software_version_info: register.software_version_info.clone(),
        }
    }

    pub fn software_version(&self) -> SoftwareVersion {
        let info = &self.software_version_info;
        let (semantic_version, commercial_version) = if self.api_version.supports_semantic_version() {
            (info.semantic_version.clone(), info.commercial_version.clone())
        } else {
            (String::new(), String::new())
        };
        SoftwareVersion {
            agent_id: self.agent_id.clone(),
            product_name: info.product_name.clone(),
            product_number: info.product_number.clone(),
            product_revision: info.revision.clone(),
            date: info.production_date.clone(),
            description: info.description.clone(),
            kind: info.kind.clone(),
            semantic_version,
            commercial_version,
        }
    }
}

fn has_invalid_software_version(info: &SoftwareVersionInfo) -> bool {
    [
        &info.product_name,
        &info.product_number,
        &info.revision,
        &info.production_date,
        &info.description,
        &info.kind,
    ]
    .iter()
    .any(|field| field.is_empty())
}

/// Software version of an agent as recorded in backups.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SoftwareVersion {
    pub agent_id: String,
    pub product_name: String,
    pub product_number: String,
    pub product_revision: String,
    pub date: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub semantic_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub commercial_version: String,
}
