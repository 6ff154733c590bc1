// src/error.rs
//! Error handling for the state engine.
//!
//! - **Device errors** come back from the injected [`Device`](crate::device::Device) as
//!   [`DeviceError`] and are either logged in place (state calls) or wrapped here.
//! - **Resource errors** (exhaustion, oversized requests, bad handles) are recoverable and
//!   surface as [`Error`] variants.
//! - Budget refusals are *not* errors; they only show up in the accounting counters.

use thiserror::Error;

use crate::engine::DeviceStatus;

/// Failure reported by a single device call.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    /// The device is lost; every device object is invalid until a reset.
    #[error("device lost")]
    Lost,

    /// The driver could not allocate the requested object.
    #[error("out of device memory")]
    OutOfMemory,

    /// The call was rejected (bad parameters, wrong state).
    #[error("invalid device call: {0}")]
    InvalidCall(&'static str),
}

/// Result of a single device call.
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Main error type for the crate.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A device call failed and the failure could not be absorbed.
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// Handle does not name a live resource.
    #[error("invalid resource handle {0}")]
    InvalidHandle(u32),

    /// Creation failed even after evicting non-essential resources.
    #[error("resource exhausted while creating {what} ({bytes} bytes)")]
    ResourceExhausted { what: &'static str, bytes: u64 },

    /// Transient allocation larger than the whole ring.
    #[error("request of {requested} bytes exceeds dynamic buffer capacity of {capacity} bytes")]
    RequestTooLarge { requested: u64, capacity: u64 },

    /// The engine is not in the `Active` device state.
    #[error("device not active ({0:?})")]
    DeviceNotActive(DeviceStatus),

    /// Configuration could not be parsed.
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),

    /// Simple custom message.
    #[error("{0}")]
    Custom(String),

    /// Context chaining.
    #[error("{message}: {source}")]
    WithContext {
        message: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a custom error message.
    #[inline]
    pub fn custom<S: Into<String>>(msg: S) -> Self {
        Self::Custom(msg.into())
    }

    /// Quick static message.
    #[inline]
    pub fn msg(msg: &'static str) -> Self {
        Self::Custom(msg.into())
    }

    /// Add context to any error (chainable, like `.context()` in anyhow).
    #[inline]
    pub fn context<C: Into<String>>(self, context: C) -> Self {
        Self::WithContext {
            message: context.into(),
            source: Box::new(self),
        }
    }

    #[inline]
    pub fn is_device(&self) -> bool {
        matches!(self, Error::Device(_))
    }

    #[inline]
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Error::ResourceExhausted { .. })
    }

    #[inline]
    pub fn is_custom(&self) -> bool {
        matches!(self, Error::Custom(_))
    }

    /// Looks through context wrappers for the root cause.
    pub fn root(&self) -> &Error {
        match self {
            Error::WithContext { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Convenient `Result` alias — use `crate::Result<T>` everywhere.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_chain_keeps_root() {
        let err = Error::from(DeviceError::OutOfMemory)
            .context("creating texture")
            .context("loading material");
        assert!(matches!(err.root(), Error::Device(DeviceError::OutOfMemory)));
        assert_eq!(
            err.to_string(),
            "loading material: creating texture: device error: out of device memory"
        );
    }

    #[test]
    fn kind_checks() {
        assert!(Error::from(DeviceError::Lost).is_device());
        assert!(Error::ResourceExhausted { what: "texture", bytes: 4 }.is_exhausted());
        assert!(Error::msg("x").is_custom());
    }
}
