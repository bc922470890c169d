use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Represents a packet of data flowing through the system
///
/// This is a wrapper around a JSON value with some helper methods
/// for working with data in different formats. Signal payloads and
/// initial instance variables are carried as data packets.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DataPacket {
    /// The inner JSON value
    pub value: serde_json::Value,
}

impl DataPacket {
    /// Create a new data packet from a JSON value
    #[inline]
    pub fn new(value: serde_json::Value) -> Self {
        Self { value }
    }

    /// Create a null data packet
    #[inline]
    pub fn null() -> Self {
        Self {
            value: serde_json::Value::Null,
        }
    }

    /// Get the inner JSON value
    #[inline]
    pub fn as_value(&self) -> &serde_json::Value {
        &self.value
    }

    /// Take ownership of the inner JSON value
    #[inline]
    pub fn into_value(self) -> serde_json::Value {
        self.value
    }

    /// Check if the data packet is null
    #[inline]
    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    /// Try to convert the data packet to an object
    #[inline]
    pub fn as_object(&self) -> Option<&serde_json::Map<String, serde_json::Value>> {
        self.value.as_object()
    }

    /// Try to convert the data packet to a specific type
    pub fn to<T>(&self) -> Result<T, serde_json::Error>
    where
        T: for<'de> DeserializeOwned,
    {
        serde_json::from_value(self.value.clone())
    }

    /// Create a data packet from a serializable value
    pub fn from<T>(value: &T) -> Result<Self, serde_json::Error>
    where
        T: Serialize,
    {
        Ok(Self::new(serde_json::to_value(value)?))
    }
}

/// The variable scope of one process instance.
///
/// Always a JSON object. Signals merge their payload into this scope and
/// flow conditions are evaluated against it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Variables {
    value: serde_json::Map<String, serde_json::Value>,
}

impl Variables {
    /// Create an empty variable scope
    pub fn new() -> Self {
        Self {
            value: serde_json::Map::new(),
        }
    }

    /// Build a variable scope from a data packet.
    ///
    /// Null packets become an empty scope; non-object packets are rejected.
    pub fn from_packet(packet: DataPacket) -> Option<Self> {
        match packet.into_value() {
            serde_json::Value::Null => Some(Self::new()),
            serde_json::Value::Object(value) => Some(Self { value }),
            _ => None,
        }
    }

    /// Merge the fields of an object payload into this scope.
    ///
    /// Later values win. Non-object payloads are ignored.
    pub fn merge(&mut self, data: &DataPacket) {
        if let Some(fields) = data.as_object() {
            for (key, value) in fields {
                self.value.insert(key.clone(), value.clone());
            }
        }
    }

    /// Get a variable by name
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.value.get(key)
    }

    /// Set a variable by name
    pub fn set(&mut self, key: &str, value: serde_json::Value) {
        self.value.insert(key.to_string(), value);
    }

    /// View the scope as a JSON value for expression evaluation
    pub fn as_value(&self) -> serde_json::Value {
        serde_json::Value::Object(self.value.clone())
    }
}

impl Default for Variables {
    fn default() -> Self {
        Self::new()
    }
}

/// Log level for engine logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Trace level - very detailed information
    Trace,
    /// Debug level - debug information
    Debug,
    /// Info level - general information
    Info,
    /// Warn level - warnings
    Warn,
    /// Error level - errors
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}
