use crate::error::ConfigurationError;
use std::path::Path;

/// Unit suffixes and their power of 1024
const UNITS: [(&str, u32); 3] = [("KB", 1), ("MB", 2), ("GB", 3)];

/// Share of usable disk space above which the cache size is reported
pub const CACHE_WARNING_RATIO: f64 = 0.8;

/// Parse a human size such as `10GB` or `512mb` into bytes
///
/// The unit suffix is mandatory; a bare number is rejected.
pub fn parse_size(value: &str) -> Result<u64, ConfigurationError> {
    let malformed = || ConfigurationError::MalformedSize {
        value: value.to_string(),
    };

    let trimmed = value.trim();
    let upper = trimmed.to_ascii_uppercase();

    let (unit, power) = UNITS
        .iter()
        .find(|(unit, _)| upper.ends_with(unit))
        .ok_or_else(malformed)?;

    let number = upper[..upper.len() - unit.len()].trim();
    if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
        return Err(malformed());
    }

    let number: u64 = number.parse().map_err(|_| malformed())?;
    number
        .checked_mul(1024u64.pow(*power))
        .ok_or_else(malformed)
}

/// Check a configured cache size against the usable space of its target
///
/// Returns a warning when the cache would take more than 80% of the usable space.
pub fn validate_cache_size(
    cache_size: &str,
    usable_bytes: u64,
    path: &Path,
) -> Result<Option<String>, ConfigurationError> {
    let cache_bytes = parse_size(cache_size)?;

    if cache_bytes >= usable_bytes {
        return Err(ConfigurationError::InsufficientDiskSpace {
            cache_size: cache_size.to_string(),
            cache_bytes,
            usable_bytes,
            path: path.to_path_buf(),
        });
    }

    let ratio = cache_bytes as f64 / usable_bytes as f64;
    if ratio > CACHE_WARNING_RATIO {
        return Ok(Some(format!(
            "Search cache size {} uses {:.0}% of the {} usable bytes on {}",
            cache_size,
            ratio * 100.0,
            usable_bytes,
            path.display()
        )));
    }

    Ok(None)
}
