//! Release-number handling for SDK and CLI versions.
//!
//! Installed package metadata reports versions in several shapes
//! (`1.0.0-beta-1`, `1`, `1.0.0.1`, `1.0a2+4.gcaa3b3fe`). Only the release
//! numbers matter here, padded or truncated to three parts.

use std::cmp::Ordering;

/// Extracts the three-part release number from a version string.
///
/// Returns `None` when the string does not start with a number.
///
/// # Example
///
/// ```
/// use holoscan_schema::version::release_version;
///
/// assert_eq!(release_version("1.0.0-beta-1").unwrap().to_string(), "1.0.0");
/// assert_eq!(release_version("1").unwrap().to_string(), "1.0.0");
/// assert!(release_version("beta").is_none());
/// ```
pub fn release_version(raw: &str) -> Option<semver::Version> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix(['v', 'V']).unwrap_or(trimmed);

    let mut parts = [0u64; 3];
    let mut seen = 0;
    for segment in trimmed.split('.') {
        let digits: String = segment.chars().take_while(char::is_ascii_digit).collect();
        if digits.is_empty() {
            break;
        }
        if seen < parts.len() {
            parts[seen] = digits.parse().ok()?;
        }
        seen += 1;
        // A suffix such as `0a2` or `0-beta` ends the release segment.
        if digits.len() != segment.len() {
            break;
        }
    }

    if seen == 0 {
        return None;
    }
    Some(semver::Version::new(parts[0], parts[1], parts[2]))
}

/// Normalizes a version string to `major.minor.patch`.
pub fn normalize(raw: &str) -> Option<String> {
    release_version(raw).map(|v| v.to_string())
}

/// Compares two versions by release number, padding missing parts with zero.
///
/// Unparseable versions sort before parseable ones.
pub fn compare_versions(left: &str, right: &str) -> Ordering {
    release_version(left).cmp(&release_version(right))
}
