use crate::error::{OrchestratorError, Result};

const MAX_ID_LENGTH: usize = 255;

/// Checks that an agent or backup manager id is safe to use as a key and as a path segment.
pub fn validate_id(id: &str) -> Result<()> {
    let reason = if id.is_empty() {
        Some("id must not be empty")
    } else if id.len() > MAX_ID_LENGTH {
        Some("id must be at most 255 characters")
    } else if id == "." || id == ".." {
        Some("id must not be a relative path component")
    } else if id.contains(['/', '\\']) {
        Some("id must not contain path separators")
    } else if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        Some("id must not contain whitespace or control characters")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(OrchestratorError::InvalidId { id: id.to_string(), reason }),
        None => Ok(()),
    }
}
