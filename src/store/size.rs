use once_cell::sync::Lazy;
use regex::Regex;

use super::StoreError;

static SIZE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(\d+)([KMG]B)?$").unwrap());

/// Parse a size string like `"10MB"`, `"512"`, or `"1gb"` into bytes. A
/// bare number is interpreted as raw bytes.
pub fn parse_size(input: &str) -> Result<u64, StoreError> {
    let caps = SIZE_PATTERN
        .captures(input.trim())
        .ok_or_else(|| StoreError::InvalidSize(input.to_string()))?;

    let amount: u64 = caps[1]
        .parse()
        .map_err(|_| StoreError::InvalidSize(input.to_string()))?;

    let multiplier = match caps.get(2).map(|m| m.as_str().to_uppercase()) {
        None => 1,
        Some(unit) if unit == "KB" => 1024,
        Some(unit) if unit == "MB" => 1024 * 1024,
        Some(unit) if unit == "GB" => 1024 * 1024 * 1024,
        _ => return Err(StoreError::InvalidSize(input.to_string())),
    };

    Ok(amount * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_bytes() {
        assert_eq!(parse_size("512").unwrap(), 512);
    }

    #[test]
    fn parses_units_case_insensitively() {
        assert_eq!(parse_size("10MB").unwrap(), 10 * 1024 * 1024);
        assert_eq!(parse_size("2gb").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_size("4Kb").unwrap(), 4 * 1024);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_size("10 MB").is_err());
        assert!(parse_size("MB10").is_err());
        assert!(parse_size("").is_err());
    }
}
