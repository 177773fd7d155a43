//! Validation of resource and type names.
//!
//! Both end up as directory names under the manager root, so they must not
//! be able to escape it.

use anyhow::{bail, Result};

/// Maximum allowed length for resource ids and type names.
pub const MAX_ID_LENGTH: usize = 128;

/// Reserved names that cannot be used as IDs (case-insensitive).
const RESERVED_NAMES: &[&str] = &[".", "..", "types", "processes"];

/// Validates that an ID is safe for use as a directory name.
///
/// An ID is valid if:
/// - It is not empty
/// - It is no longer than MAX_ID_LENGTH characters
/// - It contains only alphanumeric characters, dashes, and underscores
/// - It does not use a reserved name
///
/// # Examples
///
/// ```
/// use warden::validation::validate_id;
///
/// assert!(validate_id("broker-1").is_ok());
/// assert!(validate_id("db_main").is_ok());
/// assert!(validate_id("").is_err());
/// assert!(validate_id("../etc").is_err());
/// ```
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        bail!("ID cannot be empty");
    }

    if id.len() > MAX_ID_LENGTH {
        bail!(
            "ID too long: {} characters (max {})",
            id.len(),
            MAX_ID_LENGTH
        );
    }

    let valid_chars = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid_chars {
        bail!("ID '{id}' contains invalid characters. Use only alphanumeric characters, dashes (-), and underscores (_)");
    }

    let id_lower = id.to_lowercase();
    if RESERVED_NAMES.contains(&id_lower.as_str()) {
        bail!("ID '{id}' uses a reserved name");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_id_valid() {
        assert!(validate_id("broker").is_ok());
        assert!(validate_id("mqtt-broker-2").is_ok());
        assert!(validate_id("db_main").is_ok());
    }

    #[test]
    fn test_validate_id_empty() {
        let err = validate_id("").unwrap_err();
        assert!(err.to_string().contains("cannot be empty"));
    }

    #[test]
    fn test_validate_id_too_long() {
        assert!(validate_id(&"a".repeat(MAX_ID_LENGTH)).is_ok());
        let err = validate_id(&"a".repeat(MAX_ID_LENGTH + 1)).unwrap_err();
        assert!(err.to_string().contains("too long"));
    }

    #[test]
    fn test_validate_id_invalid_chars() {
        for id in ["../escape", "a/b", "with space", "semi;colon", "dot.ted"] {
            assert!(validate_id(id).is_err(), "{id} should be rejected");
        }
    }

    #[test]
    fn test_validate_id_reserved_names() {
        assert!(validate_id("types").is_err());
        assert!(validate_id("PROCESSES").is_err());
    }
}
