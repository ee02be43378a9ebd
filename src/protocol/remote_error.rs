use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Structured error carried in the `error` slot of a reply.
///
/// On the wire this is a JSON object with at least `name` and `message`.
/// Any further fields a handler attaches (codes, field paths, ...) are kept
/// in `details` and flattened back into the object when encoded.
///
/// Every [`std::error::Error`] converts into a `RemoteError` reduced to
/// `{name, message}`, where `name` is the error's type name. Handlers that
/// want to expose a richer structure build one with [`RemoteError::new`]
/// and [`RemoteError::with_detail`], or from an object via
/// [`RemoteError::from_value`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    // ---
    #[serde(default = "default_name")]
    name: String,

    #[serde(default)]
    message: String,

    #[serde(flatten)]
    details: Map<String, Value>,
}

fn default_name() -> String {
    "Error".to_string()
}

impl RemoteError {
    // ---

    /// Create an error with the given name and message.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        // ---
        Self {
            name: name.into(),
            message: message.into(),
            details: Map::new(),
        }
    }

    /// The error a requester reports when a deadline passes without a reply.
    pub fn timeout() -> Self {
        Self::new("TimeoutError", "request timed out")
    }

    /// Attach an additional structured field.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        // ---
        self.details.insert(key.into(), value.into());
        self
    }

    /// Build from an arbitrary JSON value.
    ///
    /// Objects are taken as the structured representation; missing `name`
    /// defaults to `"Error"` and missing `message` to the empty string. Any
    /// other value becomes the message of a plain `Error`.
    pub fn from_value(value: Value) -> Self {
        // ---
        match value {
            Value::Object(mut fields) => {
                let name = match fields.remove("name") {
                    Some(Value::String(s)) => s,
                    Some(other) => other.to_string(),
                    None => default_name(),
                };
                let message = match fields.remove("message") {
                    Some(Value::String(s)) => s,
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                Self {
                    name,
                    message,
                    details: fields,
                }
            }
            Value::String(s) => Self::new(default_name(), s),
            other => Self::new(default_name(), other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> &Map<String, Value> {
        &self.details
    }

    /// Encode as the JSON object placed in a reply.
    pub fn to_value(&self) -> Value {
        // ---
        let mut obj = Map::with_capacity(self.details.len() + 2);
        obj.insert("name".into(), Value::String(self.name.clone()));
        obj.insert("message".into(), Value::String(self.message.clone()));
        for (k, v) in &self.details {
            obj.entry(k.clone()).or_insert_with(|| v.clone());
        }
        Value::Object(obj)
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}: {}", self.name, self.message)
        }
    }
}

impl<E> From<E> for RemoteError
where
    E: std::error::Error + 'static,
{
    fn from(err: E) -> Self {
        // ---
        let type_name = std::any::type_name::<E>();
        let short = type_name
            .split('<')
            .next()
            .and_then(|path| path.rsplit("::").next())
            .unwrap_or(type_name);
        Self::new(short, err.to_string())
    }
}
