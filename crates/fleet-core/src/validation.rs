//! # Validation Module
//!
//! Input validation for identifiers and configuration values.
//!
//! ## Where Validation Runs
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Points                                  │
//! │                                                                         │
//! │  Config load (fleet-sync::config)                                      │
//! │  ├── cluster id                                                        │
//! │  └── allowed versions string                                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Control-plane REST surface                                            │
//! │  └── POST /workloads body (id, name)                                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Sync engine: a desired workload with a bad id is skipped and logged   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::types::ManagedWorkload;
use crate::MAX_WORKLOAD_ID_LEN;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Identifier Validators
// =============================================================================

/// Validates a DNS-label style identifier.
///
/// ## Rules
/// - Must not be empty
/// - At most 63 characters
/// - Lowercase ASCII letters, digits, hyphens
/// - Starts and ends with a letter or digit
fn validate_dns_label(field: &str, value: &str) -> ValidationResult<()> {
    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.len() > MAX_WORKLOAD_ID_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_WORKLOAD_ID_LEN,
        });
    }

    if !value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "must contain only lowercase letters, digits, and hyphens".to_string(),
        });
    }

    if value.starts_with('-') || value.ends_with('-') {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "must start and end with a letter or digit".to_string(),
        });
    }

    Ok(())
}

/// Validates a workload id.
///
/// ## Example
/// ```rust
/// use fleet_core::validation::validate_workload_id;
///
/// assert!(validate_workload_id("1").is_ok());
/// assert!(validate_workload_id("orders-eu").is_ok());
/// assert!(validate_workload_id("").is_err());
/// assert!(validate_workload_id("Bad_Id").is_err());
/// ```
pub fn validate_workload_id(id: &str) -> ValidationResult<()> {
    validate_dns_label("id", id)
}

/// Validates a cluster identifier.
pub fn validate_cluster_id(cluster_id: &str) -> ValidationResult<()> {
    validate_dns_label("cluster_id", cluster_id.trim())
}

/// Validates a workload document received from outside.
pub fn validate_workload(workload: &ManagedWorkload) -> ValidationResult<()> {
    validate_workload_id(&workload.id)?;

    if workload.name.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "name".to_string(),
        });
    }

    if workload.spec.capacity.max_partitions == 0 {
        return Err(ValidationError::MustBePositive {
            field: "spec.capacity.maxPartitions".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Allowed Versions
// =============================================================================

/// Parses a comma-separated version list.
///
/// Whitespace around commas is ignored. A blank input means "no versions".
/// A non-blank input that yields nothing (for example `" , "`) is rejected.
///
/// ## Example
/// ```rust
/// use fleet_core::validation::parse_allowed_versions;
///
/// assert_eq!(parse_allowed_versions("a, b ,c").unwrap(), vec!["a", "b", "c"]);
/// assert!(parse_allowed_versions("   ").unwrap().is_empty());
/// assert!(parse_allowed_versions(" , ").is_err());
/// ```
pub fn parse_allowed_versions(raw: &str) -> ValidationResult<Vec<String>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }

    let versions: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect();

    if versions.is_empty() {
        return Err(ValidationError::InvalidFormat {
            field: "allowed_versions".to_string(),
            reason: format!("no versions found in {:?}", raw),
        });
    }

    Ok(versions)
}
