//! ID generation and parsing for issues.
//!
//! IDs have the form `<prefix>-<base>` where base is either a base36
//! lowercase content-derived hash (adaptive length) or a decimal counter.
//! Hierarchical children append `.N` segments, up to three levels deep.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

/// Maximum hierarchical depth for child IDs.
pub const MAX_CHILD_DEPTH: usize = 3;

/// The prefix rule shared by `bd init` and import-side ID parsing:
/// lowercase alphabetic, 1-12 characters.
static PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[a-z]{1,12}$").expect("valid prefix pattern"));

/// Whether a string is usable as an issue ID prefix.
#[must_use]
pub fn is_valid_prefix(prefix: &str) -> bool {
    PREFIX_RE.is_match(prefix)
}

/// Default ID generation configuration.
#[derive(Debug, Clone)]
pub struct IdConfig {
    /// Issue ID prefix (e.g., "bd").
    pub prefix: String,
    /// Minimum hash length.
    pub min_hash_length: usize,
    /// Maximum hash length.
    pub max_hash_length: usize,
    /// Maximum collision probability before increasing length.
    pub max_collision_prob: f64,
}

impl Default for IdConfig {
    fn default() -> Self {
        Self {
            prefix: "bd".to_string(),
            min_hash_length: 3,
            max_hash_length: 8,
            max_collision_prob: 0.25,
        }
    }
}

impl IdConfig {
    /// Create a new ID config with the given prefix.
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Default::default()
        }
    }
}

/// ID generator that produces unique issue IDs.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    config: IdConfig,
}

impl IdGenerator {
    /// Create a new ID generator with the given config.
    #[must_use]
    pub const fn new(config: IdConfig) -> Self {
        Self { config }
    }

    /// Create a new ID generator with default config.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(IdConfig::default())
    }

    /// Get the configured prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.config.prefix
    }

    /// Compute the optimal hash length for a given issue count.
    ///
    /// Uses birthday problem approximation to estimate collision probability.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap
    )]
    pub fn optimal_length(&self, issue_count: usize) -> usize {
        let n = issue_count as f64;
        let max_prob = self.config.max_collision_prob;

        for len in self.config.min_hash_length..=self.config.max_hash_length {
            // Base36 has 36^len possible values
            let space = 36_f64.powi(len as i32);
            // Birthday problem: P(collision) ~ 1 - e^(-n^2/2d)
            let prob = 1.0 - (-n * n / (2.0 * space)).exp();
            if prob < max_prob {
                return len;
            }
        }
        self.config.max_hash_length
    }

    /// Generate a candidate ID with the given parameters.
    #[must_use]
    pub fn generate_candidate(
        &self,
        title: &str,
        description: Option<&str>,
        creator: Option<&str>,
        created_at: DateTime<Utc>,
        nonce: u32,
        hash_length: usize,
    ) -> String {
        let seed = generate_id_seed(title, description, creator, created_at, nonce);
        let hash_str = compute_id_hash(&seed, hash_length);
        format!("{}-{hash_str}", self.config.prefix)
    }

    /// Generate an ID, checking for collisions with the provided checker.
    ///
    /// The checker function should return `true` if the ID already exists.
    pub fn generate<F>(
        &self,
        title: &str,
        description: Option<&str>,
        creator: Option<&str>,
        created_at: DateTime<Utc>,
        issue_count: usize,
        exists: F,
    ) -> String
    where
        F: Fn(&str) -> bool,
    {
        let mut length = self.optimal_length(issue_count);

        loop {
            // Try nonces 0..10 at this length
            for nonce in 0..10 {
                let id =
                    self.generate_candidate(title, description, creator, created_at, nonce, length);
                if !exists(&id) {
                    return id;
                }
            }

            // All nonces collided, increase length
            if length < self.config.max_hash_length {
                length += 1;
            } else {
                // Full-length hash with increasing nonces until free
                let mut nonce = 0;
                loop {
                    let seed = generate_id_seed(title, description, creator, created_at, nonce);
                    let hash_str = compute_id_hash(&seed, 12);
                    let id = format!("{}-{hash_str}", self.config.prefix);

                    if !exists(&id) {
                        return id;
                    }

                    nonce += 1;

                    if nonce > 1000 {
                        // Desperate fallback: append large number to guarantee uniqueness
                        return format!("{}-{}-{}", self.config.prefix, hash_str, nonce);
                    }
                }
            }
        }
    }
}

/// Generate the seed string for ID generation.
///
/// Inputs: `title | description | creator | created_at (ns) | nonce`
#[must_use]
pub fn generate_id_seed(
    title: &str,
    description: Option<&str>,
    creator: Option<&str>,
    created_at: DateTime<Utc>,
    nonce: u32,
) -> String {
    format!(
        "{}|{}|{}|{}|{}",
        title,
        description.unwrap_or(""),
        creator.unwrap_or(""),
        created_at.timestamp_nanos_opt().unwrap_or(0),
        nonce
    )
}

/// Compute a base36 hash of the input string with a specific length.
///
/// Uses SHA256 to hash the input, then converts the first 8 bytes to a u64,
/// encodes as base36, and truncates to the requested length.
#[must_use]
pub fn compute_id_hash(input: &str, length: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let result = hasher.finalize();

    // Use first 8 bytes for a 64-bit integer
    let mut num = 0u64;
    for &byte in result.iter().take(8) {
        num = (num << 8) | u64::from(byte);
    }

    let encoded = base36_encode(num);

    // Pad with '0' if too short (unlikely for u64 but possible)
    let mut s = encoded;
    if s.len() < length {
        s = format!("{s:0>length$}");
    }

    s.chars().take(length).collect()
}

fn base36_encode(mut num: u64) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if num == 0 {
        return "0".to_string();
    }
    let mut chars = Vec::new();
    while num > 0 {
        chars.push(ALPHABET[(num % 36) as usize] as char);
        num /= 36;
    }
    chars.into_iter().rev().collect()
}

/// Derive a replacement ID for an import collision: the incoming record's
/// prefix plus a suffix taken from its content hash, lengthened until free.
pub fn collision_remap_id<F>(prefix: &str, content_hash: &str, exists: F) -> String
where
    F: Fn(&str) -> bool,
{
    for len in 6..=content_hash.len() {
        let candidate = format!("{}-{}", prefix, &content_hash[..len]);
        if !exists(&candidate) {
            return candidate;
        }
    }
    // Entire hash collided; disambiguate with a counter
    let mut n = 2u32;
    loop {
        let candidate = format!("{prefix}-{content_hash}-{n}");
        if !exists(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

// ============================================================================
// Child ID Helpers
// ============================================================================

/// Generate child ID from parent.
///
/// Child IDs have format: `<parent>.<n>` where n is the child number.
#[must_use]
pub fn child_id(parent_id: &str, child_number: u32) -> String {
    format!("{parent_id}.{child_number}")
}

/// Check if an ID is a child ID (contains a dot after the base part).
#[must_use]
pub fn is_child_id(id: &str) -> bool {
    id.find('-')
        .map_or_else(|| id.contains('.'), |pos| id[pos + 1..].contains('.'))
}

/// Get the depth of a hierarchical ID.
///
/// Top-level IDs have depth 0, first-level children have depth 1, etc.
#[must_use]
pub fn id_depth(id: &str) -> usize {
    id.find('-').map_or_else(
        || id.matches('.').count(),
        |pos| id[pos + 1..].matches('.').count(),
    )
}

// ============================================================================
// ID Parsing and Validation
// ============================================================================

use crate::error::{BeadsError, Result};

/// Parsed components of an issue ID.
///
/// Supports both root IDs (`bd-abc123`, `bd-42`) and hierarchical IDs
/// (`bd-abc123.1.2`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedId {
    /// The prefix (e.g., "bd").
    pub prefix: String,
    /// The base portion (hash or decimal counter, e.g., "abc123" or "42").
    pub base: String,
    /// Child path segments if this is a hierarchical ID (e.g., `[1, 2]` for `.1.2`).
    pub child_path: Vec<u32>,
}

impl ParsedId {
    /// Returns true if this is a root (non-hierarchical) ID.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.child_path.is_empty()
    }

    /// Returns the depth in the hierarchy (0 for root).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.child_path.len()
    }

    /// Get the parent ID if this is a child.
    ///
    /// Returns `None` for root IDs.
    #[must_use]
    pub fn parent(&self) -> Option<String> {
        if self.child_path.is_empty() {
            return None;
        }

        let mut parent_path = self.child_path.clone();
        parent_path.pop();

        if parent_path.is_empty() {
            Some(format!("{}-{}", self.prefix, self.base))
        } else {
            let path_str = format_child_path(&parent_path);
            Some(format!("{}-{}{}", self.prefix, self.base, path_str))
        }
    }

    /// Reconstruct the full ID string.
    #[must_use]
    pub fn to_id_string(&self) -> String {
        if self.child_path.is_empty() {
            format!("{}-{}", self.prefix, self.base)
        } else {
            let path_str = format_child_path(&self.child_path);
            format!("{}-{}{}", self.prefix, self.base, path_str)
        }
    }
}

fn format_child_path(path: &[u32]) -> String {
    let mut out = String::new();
    for segment in path {
        use std::fmt::Write;
        let _ = write!(out, ".{segment}");
    }
    out
}

/// Parse an issue ID into its components.
///
/// # Errors
///
/// Returns `InvalidId` if the format is invalid or the child path exceeds
/// the maximum depth.
pub fn parse_id(id: &str) -> Result<ParsedId> {
    let Some(dash_pos) = id.find('-') else {
        return Err(BeadsError::InvalidId { id: id.to_string() });
    };

    let prefix = &id[..dash_pos];
    let remainder = &id[dash_pos + 1..];

    if remainder.is_empty() || !is_valid_prefix(prefix) {
        return Err(BeadsError::InvalidId { id: id.to_string() });
    }

    // Split remainder by '.' to get the base and child path
    let parts: Vec<&str> = remainder.split('.').collect();
    let base = parts[0].to_string();

    if base.is_empty() {
        return Err(BeadsError::InvalidId { id: id.to_string() });
    }

    // Base is base36: lowercase alphanumeric (covers decimal counters too)
    if !base
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    {
        return Err(BeadsError::InvalidId { id: id.to_string() });
    }

    let mut child_path = Vec::new();
    for part in parts.iter().skip(1) {
        match part.parse::<u32>() {
            Ok(n) => child_path.push(n),
            Err(_) => return Err(BeadsError::InvalidId { id: id.to_string() }),
        }
    }

    if child_path.len() > MAX_CHILD_DEPTH {
        return Err(BeadsError::InvalidId { id: id.to_string() });
    }

    Ok(ParsedId {
        prefix: prefix.to_string(),
        base,
        child_path,
    })
}

/// Validate that an ID has the expected prefix.
///
/// # Errors
///
/// Returns `PrefixMismatch` if the prefix doesn't match expected or allowed.
pub fn validate_prefix(id: &str, expected_prefix: &str, allowed_prefixes: &[String]) -> Result<()> {
    let parsed = parse_id(id)?;

    if parsed.prefix == expected_prefix {
        return Ok(());
    }

    if allowed_prefixes.contains(&parsed.prefix) {
        return Ok(());
    }

    Err(BeadsError::PrefixMismatch {
        expected: expected_prefix.to_string(),
        found: parsed.prefix,
    })
}

/// Normalize an ID to consistent lowercase format.
#[must_use]
pub fn normalize_id(id: &str) -> String {
    id.to_lowercase()
}

/// Check if a string looks like a valid issue ID format.
#[must_use]
pub fn is_valid_id_format(id: &str) -> bool {
    parse_id(id).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_deterministic_for_same_seed() {
        let generator = IdGenerator::with_defaults();
        let at = Utc::now();
        let a = generator.generate_candidate("Title", None, None, at, 0, 4);
        let b = generator.generate_candidate("Title", None, None, at, 0, 4);
        assert_eq!(a, b);
        assert!(a.starts_with("bd-"));
    }

    #[test]
    fn test_generate_avoids_collisions() {
        let generator = IdGenerator::with_defaults();
        let at = Utc::now();
        let taken = generator.generate("Title", None, None, at, 0, |_| false);
        let fresh = generator.generate("Title", None, None, at, 0, |id| id == taken);
        assert_ne!(taken, fresh);
    }

    #[test]
    fn test_optimal_length_grows_with_count() {
        let generator = IdGenerator::with_defaults();
        assert!(generator.optimal_length(10) <= generator.optimal_length(100_000));
    }

    #[test]
    fn test_parse_hash_and_counter_ids() {
        let parsed = parse_id("bd-abc123").unwrap();
        assert_eq!(parsed.prefix, "bd");
        assert_eq!(parsed.base, "abc123");
        assert!(parsed.is_root());

        let parsed = parse_id("t-42").unwrap();
        assert_eq!(parsed.base, "42");
    }

    #[test]
    fn test_parse_child_ids() {
        let parsed = parse_id("bd-abc123.1.2").unwrap();
        assert_eq!(parsed.child_path, vec![1, 2]);
        assert_eq!(parsed.depth(), 2);
        assert_eq!(parsed.parent().unwrap(), "bd-abc123.1");
        assert_eq!(parsed.to_id_string(), "bd-abc123.1.2");
    }

    #[test]
    fn test_parse_rejects_deep_nesting() {
        assert!(parse_id("bd-a.1.2.3").is_ok());
        assert!(parse_id("bd-a.1.2.3.4").is_err());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_id("noprefix").is_err());
        assert!(parse_id("-abc").is_err());
        assert!(parse_id("bd-").is_err());
        assert!(parse_id("bd-ABC").is_err());
        assert!(parse_id("1d2-abc").is_err());
        assert!(parse_id("bd-abc.x").is_err());
    }

    #[test]
    fn test_prefix_rule() {
        assert!(is_valid_prefix("bd"));
        assert!(is_valid_prefix("t"));
        assert!(!is_valid_prefix(""));
        assert!(!is_valid_prefix("BD"));
        assert!(!is_valid_prefix("bd2"));
        assert!(!is_valid_prefix("has-dash"));
        assert!(!is_valid_prefix("waytoolongforaprefix"));
    }

    #[test]
    fn test_validate_prefix() {
        assert!(validate_prefix("bd-1", "bd", &[]).is_ok());
        assert!(validate_prefix("xx-1", "bd", &["xx".to_string()]).is_ok());
        assert!(matches!(
            validate_prefix("xx-1", "bd", &[]),
            Err(BeadsError::PrefixMismatch { .. })
        ));
    }

    #[test]
    fn test_collision_remap_id_uses_hash_suffix() {
        let hash = "0123456789abcdef";
        let id = collision_remap_id("bd", hash, |_| false);
        assert_eq!(id, "bd-012345");

        let id = collision_remap_id("bd", hash, |c| c == "bd-012345");
        assert_eq!(id, "bd-0123456");
    }

    #[test]
    fn test_child_helpers() {
        assert_eq!(child_id("bd-a", 3), "bd-a.3");
        assert!(is_child_id("bd-a.3"));
        assert!(!is_child_id("bd-a"));
        assert_eq!(id_depth("bd-a.1.2"), 2);
    }
}
