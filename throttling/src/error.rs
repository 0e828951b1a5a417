use thiserror::Error;

/// Errors raised by the throttling library
///
/// Per-request rejections are never errors: they are reported through
/// [`crate::ThrottlingResult`]. These variants cover misconfiguration and
/// invalid arguments only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ThrottlingError {
    #[error("Permit count must not be negative, got {0}")]
    NegativeCount(i64),

    #[error("Invalid throttling configuration: {0}")]
    InvalidConfig(String),

    #[error("State actualization failed: {0}")]
    Actualization(String),

    #[error("Throttling observer failed: {0}")]
    Observer(String),
}

pub type Result<T> = std::result::Result<T, ThrottlingError>;

/// Validates that a fraction of total capacity lies in the [0; 1] range
pub(crate) fn check_fraction(name: &str, fraction: f64) -> Result<f64> {
    if !(0.0..=1.0).contains(&fraction) {
        return Err(ThrottlingError::InvalidConfig(format!("{name} must be in [0; 1] range, got {fraction}")));
    }
    Ok(fraction)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_fraction_bounds() {
        assert_eq!(check_fraction("fraction", 0.0), Ok(0.0));
        assert_eq!(check_fraction("fraction", 1.0), Ok(1.0));
        assert!(matches!(check_fraction("fraction", 1.01), Err(ThrottlingError::InvalidConfig(_))));
        assert!(matches!(check_fraction("fraction", -0.1), Err(ThrottlingError::InvalidConfig(_))));
        assert!(check_fraction("fraction", f64::NAN).is_err());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(ThrottlingError::NegativeCount(-3).to_string(), "Permit count must not be negative, got -3");
    }
}
