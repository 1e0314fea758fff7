/// Error classification shared by producers, consumers and stores
use std::fmt;

/// How a failure should be treated by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Network blip, broker unavailable, store timeout: retry with backoff
    Transient,
    /// Malformed input, auth failure, constraint violation: surface, never retry
    Fatal,
    /// Unique-key hit on an idempotent write: a safe redelivery, not a failure
    Duplicate,
}

impl ErrorClass {
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorClass::Transient)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Fatal => "fatal",
            ErrorClass::Duplicate => "duplicate",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Implemented by error types that know their own [`ErrorClass`]
pub trait Classify {
    fn class(&self) -> ErrorClass;

    fn is_transient(&self) -> bool {
        self.class().is_transient()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Flaky(bool);

    impl Classify for Flaky {
        fn class(&self) -> ErrorClass {
            if self.0 {
                ErrorClass::Transient
            } else {
                ErrorClass::Fatal
            }
        }
    }

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(ErrorClass::Transient.is_transient());
        assert!(!ErrorClass::Fatal.is_transient());
        assert!(!ErrorClass::Duplicate.is_transient());

        assert!(Flaky(true).is_transient());
        assert!(!Flaky(false).is_transient());
    }

    #[test]
    fn test_display() {
        assert_eq!(ErrorClass::Duplicate.to_string(), "duplicate");
        assert_eq!(ErrorClass::Fatal.to_string(), "fatal");
    }
}
