use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity shared by a request and its reply.
///
/// Ids are either supplied by the caller (continuing an existing request
/// chain) or generated as UUID v4 in the standard 36-byte string form.
/// They are carried in-band inside the wire messages and are opaque to the
/// transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    // ---

    /// Generate a new unique request id
    pub fn generate() -> Self {
        // ---
        Self(Uuid::new_v4().to_string())
    }

    /// Get the request id as a string slice
    pub fn as_str(&self) -> &str {
        // ---
        &self.0
    }
}

impl fmt::Display for RequestId {
    // ---

    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        f.write_str(&self.0)
    }
}

impl From<String> for RequestId {
    // ---

    fn from(s: String) -> Self {
        // ---
        Self(s)
    }
}

impl From<&str> for RequestId {
    // ---

    fn from(s: &str) -> Self {
        // ---
        Self(s.to_string())
    }
}

impl From<Uuid> for RequestId {
    // ---

    fn from(uuid: Uuid) -> Self {
        // ---
        Self(uuid.to_string())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_generate_unique() {
        // ---
        let id1 = RequestId::generate();
        let id2 = RequestId::generate();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_format() {
        // ---
        let id = RequestId::generate();
        let s = id.to_string();
        assert_eq!(s.len(), 36); // Standard UUID format
    }

    #[test]
    fn test_serializes_as_plain_string() {
        // ---
        let id = RequestId::from("r1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"r1\"");
    }
}
