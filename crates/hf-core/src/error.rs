//! Error types for the HistFactory compiler

use std::fmt;

use thiserror::Error;

/// Location of a bad input inside a measurement.
///
/// Every field is optional; only the names that are known at the point of
/// failure are filled in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Channel name.
    pub channel: Option<String>,
    /// Sample name.
    pub sample: Option<String>,
    /// Systematic (or parameter) name.
    pub systematic: Option<String>,
}

impl ErrorContext {
    /// Context pointing at a channel.
    pub fn channel(name: impl Into<String>) -> Self {
        Self { channel: Some(name.into()), ..Self::default() }
    }

    /// Context pointing at a parameter / systematic only.
    pub fn systematic(name: impl Into<String>) -> Self {
        Self { systematic: Some(name.into()), ..Self::default() }
    }

    /// Attach a channel name.
    pub fn with_channel(mut self, name: impl Into<String>) -> Self {
        self.channel = Some(name.into());
        self
    }

    /// Attach a sample name.
    pub fn with_sample(mut self, name: impl Into<String>) -> Self {
        self.sample = Some(name.into());
        self
    }

    /// Attach a systematic name.
    pub fn with_systematic(mut self, name: impl Into<String>) -> Self {
        self.systematic = Some(name.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::with_capacity(3);
        if let Some(c) = &self.channel {
            parts.push(format!("channel={}", c));
        }
        if let Some(s) = &self.sample {
            parts.push(format!("sample={}", s));
        }
        if let Some(s) = &self.systematic {
            parts.push(format!("systematic={}", s));
        }
        if parts.is_empty() {
            f.write_str("measurement")
        } else {
            f.write_str(&parts.join(" "))
        }
    }
}

/// Compiler error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid call arguments (e.g. wrong parameter-vector length)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Structurally inconsistent measurement description.
    ///
    /// Aborts the smallest enclosing unit (channel or run).
    #[error("Configuration error ({context}): {message}")]
    Configuration {
        /// Where the bad input lives.
        context: ErrorContext,
        /// What is wrong with it.
        message: String,
    },

    /// Internal invariant violated
    #[error("Computation error: {0}")]
    Computation(String),
}

impl Error {
    /// Shorthand for [`Error::Configuration`].
    pub fn config(context: ErrorContext, message: impl Into<String>) -> Self {
        Error::Configuration { context, message: message.into() }
    }

    /// Whether this is a configuration error.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration { .. })
    }

    /// Fill in the channel and sample of a configuration error where unset.
    ///
    /// Other variants pass through unchanged.
    pub fn locate(self, channel: Option<&str>, sample: Option<&str>) -> Self {
        match self {
            Error::Configuration { mut context, message } => {
                if context.channel.is_none() {
                    context.channel = channel.map(str::to_string);
                }
                if context.sample.is_none() {
                    context.sample = sample.map(str::to_string);
                }
                Error::Configuration { context, message }
            }
            other => other,
        }
    }

    /// Context of a configuration error, if any.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } => Some(context),
            _ => None,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
