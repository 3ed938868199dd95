use thiserror::Error;

pub type Result<T> = std::result::Result<T, MixError>;

/// Errors that abort a mix invocation (or, for `NumericOverflow`, a single segment).
#[derive(Debug, Error)]
pub enum MixError {
    /// The source or stinger buffer is unusable.
    #[error("invalid input: {0}")]
    Input(String),

    #[error("target duration {secs:.1}s outside {min:.0}-{max:.0}s")]
    InvalidTarget { secs: f64, min: f64, max: f64 },

    /// A configuration value is out of range or contradicts another.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unknown theme '{0}'")]
    UnknownTheme(String),

    /// A processing stage produced NaN or infinite samples.
    #[error("stage '{stage}' produced non-finite samples")]
    NumericOverflow { stage: &'static str },

    #[error("no segment survived processing")]
    NoSegments,

    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

impl MixError {
    pub fn input(reason: impl Into<String>) -> Self {
        Self::Input(reason.into())
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_helper_formats_reason() {
        let err = MixError::input("buffer is empty");
        assert_eq!(err.to_string(), "invalid input: buffer is empty");
    }

    #[test]
    fn target_error_mentions_bounds() {
        let err = MixError::InvalidTarget { secs: 5.0, min: 10.0, max: 1800.0 };
        let msg = err.to_string();
        assert!(msg.contains("5.0s"));
        assert!(msg.contains("10-1800s"));
    }
}
