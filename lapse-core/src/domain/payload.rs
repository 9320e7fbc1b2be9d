//! Job payloads
//!
//! A payload is the caller-owned part of a job: a declared `kind` used to pick
//! a handler, and opaque JSON `data` the handler interprets.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Caller-owned job content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub kind: String,
    pub data: serde_json::Value,
}

impl Payload {
    pub fn new(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// Serializes a typed job into a payload tagged with its kind
    pub fn from_job<J: JobKind>(job: &J) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind: J::KIND.to_string(),
            data: serde_json::to_value(job)?,
        })
    }

    /// Deserializes the payload data as a typed job
    pub fn to_job<J: JobKind>(&self) -> Result<J, serde_json::Error> {
        J::deserialize(&self.data)
    }
}

/// A serializable job type with a stable kind name.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct SendEmail { to: String, body: String }
///
/// impl JobKind for SendEmail {
///     const KIND: &'static str = "send_email";
/// }
/// ```
pub trait JobKind: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Unique identifier for this job type (e.g. `"send_email"`).
    const KIND: &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Reminder {
        user: String,
        minutes: u32,
    }

    impl JobKind for Reminder {
        const KIND: &'static str = "reminder";
    }

    #[test]
    fn test_payload_from_typed_job() {
        let payload = Payload::from_job(&Reminder {
            user: "ada".to_string(),
            minutes: 5,
        })
        .unwrap();

        assert_eq!(payload.kind, "reminder");
        assert_eq!(payload.data, json!({"user": "ada", "minutes": 5}));
    }

    #[test]
    fn test_payload_to_typed_job_rejects_wrong_shape() {
        let payload = Payload::new("reminder", json!({"user": 42}));
        assert!(payload.to_job::<Reminder>().is_err());
    }
}
