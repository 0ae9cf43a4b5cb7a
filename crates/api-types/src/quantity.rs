//! Kubernetes resource quantity parsing.
//!
//! Only the subset needed for alert thresholds is supported: plain decimal
//! numbers, the milli suffix for CPU, and the binary/decimal byte suffixes
//! for memory.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuantityError {
    #[error("quantity is empty")]
    Empty,

    #[error("invalid number in quantity `{0}`")]
    InvalidNumber(String),

    #[error("unsupported suffix `{suffix}` in quantity `{quantity}`")]
    UnsupportedSuffix { quantity: String, suffix: String },

    #[error("quantity `{0}` must not be negative")]
    Negative(String),
}

const MEMORY_SUFFIXES: &[(&str, f64)] = &[
    ("Ki", 1024.0),
    ("Mi", 1024.0 * 1024.0),
    ("Gi", 1024.0 * 1024.0 * 1024.0),
    ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("k", 1e3),
    ("K", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
];

fn split_number(quantity: &str) -> Result<(f64, &str), QuantityError> {
    let trimmed = quantity.trim();
    if trimmed.is_empty() {
        return Err(QuantityError::Empty);
    }

    let split_at = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'))
        .unwrap_or(trimmed.len());
    let (number, suffix) = trimmed.split_at(split_at);

    let value = number
        .parse::<f64>()
        .map_err(|_| QuantityError::InvalidNumber(quantity.to_string()))?;
    if value < 0.0 {
        return Err(QuantityError::Negative(quantity.to_string()));
    }
    Ok((value, suffix))
}

/// Parses a CPU quantity (`"250m"`, `"0.5"`, `"2"`) into cores.
pub fn parse_cpu_cores(quantity: &str) -> Result<f64, QuantityError> {
    let (value, suffix) = split_number(quantity)?;
    match suffix {
        "" => Ok(value),
        "m" => Ok(value / 1000.0),
        other => Err(QuantityError::UnsupportedSuffix {
            quantity: quantity.to_string(),
            suffix: other.to_string(),
        }),
    }
}

/// Parses a memory quantity (`"128Mi"`, `"1G"`, `"1048576"`) into bytes.
pub fn parse_memory_bytes(quantity: &str) -> Result<u64, QuantityError> {
    let (value, suffix) = split_number(quantity)?;
    if suffix.is_empty() {
        return Ok(value.round() as u64);
    }

    MEMORY_SUFFIXES
        .iter()
        .find(|(name, _)| *name == suffix)
        .map(|(_, multiplier)| (value * multiplier).round() as u64)
        .ok_or_else(|| QuantityError::UnsupportedSuffix {
            quantity: quantity.to_string(),
            suffix: suffix.to_string(),
        })
}
