use crate::types::{FromValue, Value, ValueError};

/// Outcome of a remote call as seen by the caller.
///
/// A timeout is a first-class value rather than an error: every failure on
/// the remote path (no response, transport failure, callee fault, no
/// provider found) collapses into [`RemoteResult::Timeout`].
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteResult {
    /// The callee returned a value.
    Value(Value),
    /// The callee completed without a value, or no reply was requested.
    Void,
    /// No response arrived before the deadline.
    Timeout,
}

impl RemoteResult {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Decodes the carried value. `Void` and `Timeout` yield `None`.
    ///
    /// # Errors
    ///
    /// Returns a [`ValueError`] if a value is present but has the wrong kind.
    pub fn decode<T: FromValue>(self) -> Result<Option<T>, ValueError> {
        self.into_value().map(T::from_value).transpose()
    }
}

impl From<Value> for RemoteResult {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}
