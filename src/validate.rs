use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ValidationError;

static MAC_CANONICAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9a-f]{2}:){5}[0-9a-f]{2}$").expect("valid regex"));

static INTERFACE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^[a-z]{2,4}[0-9]+([a-z][0-9]+)?$").expect("valid regex"));

/// Matches a MAC address anywhere in a line of tool output, either separator style.
pub(crate) static MAC_IN_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)([0-9a-f]{2}[:-]){5}[0-9a-f]{2}").expect("valid regex"));

/// Lower-case a MAC address and use colons as separators.
pub fn normalize_mac(input: &str) -> Result<String, ValidationError> {
    let normalized = input.trim().to_ascii_lowercase().replace('-', ":");
    if normalized.is_empty() || !MAC_CANONICAL.is_match(&normalized) {
        return Err(ValidationError::InvalidMac(input.into()));
    }
    Ok(normalized)
}

pub fn validate_interface_name(input: &str) -> Result<String, ValidationError> {
    if input.is_empty() || !INTERFACE_NAME.is_match(input) {
        return Err(ValidationError::InvalidInterfaceName(input.into()));
    }
    Ok(input.into())
}

pub fn is_valid_interface_name(name: &str) -> bool {
    validate_interface_name(name).is_ok()
}

/// Compare two addresses ignoring case and separator style.
pub fn same_mac(a: &str, b: &str) -> bool {
    match (normalize_mac(a), normalize_mac(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
