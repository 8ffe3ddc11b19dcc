//! Validation helpers for command inputs.

use validator::ValidationError;

/// Longest MAC-like identifier accepted as a path segment.
const MAX_MAC_LEN: usize = 64;

/// Validates that a device MAC can be used as a single URL path segment.
///
/// The engine does not insist on a particular MAC notation since the server treats it as an
/// opaque key; it only rejects values that would address the wrong endpoint.
///
/// # Examples
///
/// ```ignore
/// validate_mac("AA:BB:CC:DD:EE:FF") // Ok
/// validate_mac("")                  // Err - empty
/// validate_mac("AA/BB")             // Err - path separator
/// ```
pub fn validate_mac(mac: &str) -> Result<(), ValidationError> {
    if mac.trim().is_empty() {
        let mut err = ValidationError::new("mac_empty");
        err.message = Some("MAC must not be empty".into());
        return Err(err);
    }

    if mac.len() > MAX_MAC_LEN {
        let mut err = ValidationError::new("mac_length");
        err.message = Some(
            format!(
                "MAC must be at most {MAX_MAC_LEN} characters (got {})",
                mac.len()
            )
            .into(),
        );
        return Err(err);
    }

    if mac.chars().any(|c| c == '/' || c.is_whitespace() || c.is_control()) {
        let mut err = ValidationError::new("mac_format");
        err.message = Some("MAC must not contain separators or whitespace".into());
        return Err(err);
    }

    Ok(())
}

/// Validates that a call sign is a non-empty single path segment.
pub fn validate_identifier(identifier: &str) -> Result<(), ValidationError> {
    if identifier.trim().is_empty() {
        let mut err = ValidationError::new("identifier_empty");
        err.message = Some("identifier must not be empty".into());
        return Err(err);
    }

    if identifier.contains('/') {
        let mut err = ValidationError::new("identifier_format");
        err.message = Some("identifier must not contain `/`".into());
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_mac_valid() {
        assert!(validate_mac("AA:BB:CC:DD:EE:FF").is_ok());
        assert!(validate_mac("aabbccddeeff").is_ok());
        assert!(validate_mac("aa-bb-cc-dd-ee-ff").is_ok());
    }

    #[test]
    fn test_validate_mac_invalid() {
        assert!(validate_mac("").is_err()); // empty
        assert!(validate_mac("   ").is_err()); // blank
        assert!(validate_mac("AA/BB").is_err()); // separator
        assert!(validate_mac("AA BB").is_err()); // space
        assert!(validate_mac(&"A".repeat(65)).is_err()); // too long
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("A").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("A/B").is_err());
    }
}
