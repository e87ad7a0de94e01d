use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Opaque unit of data flowing between feeds.
///
/// Cloning is cheap: fan-out hands the same payload to every dependent.
#[derive(Clone)]
pub struct Sample(Arc<dyn Any + Send + Sync>);

impl Sample {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Wrap `sample` so `key` travels with it through a transform chain
    pub fn keyed(key: impl Into<String>, sample: Sample) -> Self {
        Self::new(Keyed {
            key: key.into(),
            sample,
        })
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.0.is::<T>()
    }

    /// Returns the non-fatal error carried by this sample, looking through
    /// one `Keyed` wrapper.
    pub fn as_error(&self) -> Option<&SampleError> {
        if let Some(err) = self.downcast_ref::<SampleError>() {
            return Some(err);
        }
        self.downcast_ref::<Keyed>()
            .and_then(|keyed| keyed.sample.downcast_ref::<SampleError>())
    }

    pub fn ptr_eq(&self, other: &Sample) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(err) = self.downcast_ref::<SampleError>() {
            return write!(f, "Sample({:?})", err);
        }
        if let Some(keyed) = self.downcast_ref::<Keyed>() {
            return write!(f, "Sample({:?})", keyed);
        }
        f.write_str("Sample(..)")
    }
}

/// A sample together with the key it was produced under
#[derive(Debug, Clone)]
pub struct Keyed {
    pub key: String,
    pub sample: Sample,
}

/// "No output for this input, for this reason."
///
/// Emitting one of these from a transform is not a failure of the run: the
/// worker diverts it into per-feed error statistics instead of passing it
/// downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleError {
    pub reason: String,
    pub error: Option<String>,
}

impl fmt::Display for SampleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(err) => write!(f, "{}: {}", self.reason, err),
            None => f.write_str(&self.reason),
        }
    }
}

pub fn new_error(reason: impl Into<String>) -> Sample {
    Sample::new(SampleError {
        reason: reason.into(),
        error: None,
    })
}

pub fn wrap_error(reason: impl Into<String>, err: impl fmt::Display) -> Sample {
    Sample::new(SampleError {
        reason: reason.into(),
        error: Some(err.to_string()),
    })
}

/// Uses the error's own text as the reason
pub fn coerce_error(err: impl fmt::Display) -> Sample {
    let text = err.to_string();
    Sample::new(SampleError {
        reason: text.clone(),
        error: Some(text),
    })
}

/// One item pulled from a source. Sources signal end of stream by
/// returning `None` instead of a record.
#[derive(Debug, Clone)]
pub struct Record {
    pub key: String,
    pub value: Sample,
}

impl Record {
    pub fn new(key: impl Into<String>, value: Sample) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downcast() {
        let s = Sample::new(42i64);
        assert_eq!(s.downcast_ref::<i64>(), Some(&42));
        assert!(s.downcast_ref::<String>().is_none());
        assert!(s.as_error().is_none());
    }

    #[test]
    fn test_error_seen_through_keyed() {
        let err = wrap_error("parse failed", "unexpected token");
        let keyed = Sample::keyed("file.py", err);

        let found = keyed.as_error().unwrap();
        assert_eq!(found.reason, "parse failed");
        assert_eq!(found.to_string(), "parse failed: unexpected token");
    }

    #[test]
    fn test_coerce_error_reason() {
        let s = coerce_error("boom");
        assert_eq!(s.as_error().unwrap().reason, "boom");
    }
}
