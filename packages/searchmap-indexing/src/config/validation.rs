//! Configuration validation

use super::error::{ConfigError, ConfigResult};
use std::fmt::Display;
use std::ops::RangeInclusive;

/// Trait for validatable configuration objects
pub trait Validatable {
    /// Returns `Ok(())` if valid, `Err(ConfigError)` with details if invalid.
    fn validate(&self) -> ConfigResult<()>;

    /// Configuration name for error messages
    fn config_name(&self) -> &'static str {
        "Config"
    }
}

/// Check `value` against an inclusive range
pub fn check_range<T>(
    field: &str,
    value: T,
    range: RangeInclusive<T>,
    hint: &str,
) -> ConfigResult<()>
where
    T: PartialOrd + Display + Copy,
{
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::range_with_hint(
            field,
            value,
            *range.start(),
            *range.end(),
            hint,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_range() {
        assert!(check_range("batch_size", 5usize, 1..=10, "").is_ok());
        assert!(check_range("batch_size", 1usize, 1..=10, "").is_ok());
        assert!(check_range("batch_size", 10usize, 1..=10, "").is_ok());

        let err = check_range("batch_size", 11usize, 1..=10, "too big").unwrap_err();
        assert!(matches!(err, ConfigError::Range { ref field, .. } if field == "batch_size"));
    }
}
