use std::collections::BTreeMap;

/// AMQP field table: the `headers` property and method `arguments`.
pub type FieldTable = BTreeMap<String, FieldValue>;

/// A single value in a [`FieldTable`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Boolean(bool),
    I32(i32),
    I64(i64),
    F64(f64),
    LongString(String),
    Timestamp(u64),
    Table(FieldTable),
    Array(Vec<FieldValue>),
    Void,
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::I32(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::I64(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::LongString(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::LongString(value)
    }
}

/// Content header properties of the Basic class.
///
/// Every property is optional; `BasicProperties::default()` is the empty
/// record sent when a publisher supplies none.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BasicProperties {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub headers: Option<FieldTable>,
    /// 1 = transient, 2 = persistent.
    pub delivery_mode: Option<u8>,
    pub priority: Option<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub expiration: Option<String>,
    pub message_id: Option<String>,
    pub timestamp: Option<u64>,
    /// The `type` property.
    pub kind: Option<String>,
    pub user_id: Option<String>,
    pub app_id: Option<String>,
    pub cluster_id: Option<String>,
}

impl BasicProperties {
    /// Delivery mode value for messages that survive a broker restart.
    pub const PERSISTENT: u8 = 2;

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_delivery_mode(mut self, mode: u8) -> Self {
        self.delivery_mode = Some(mode);
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Insert one header, creating the table if needed.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.headers
            .get_or_insert_with(FieldTable::new)
            .insert(key.into(), value.into());
        self
    }

    /// True when no property is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_empty() {
        assert!(BasicProperties::default().is_empty());
    }

    #[test]
    fn builder_sets_fields() {
        let props = BasicProperties::default()
            .with_content_type("application/json")
            .with_delivery_mode(BasicProperties::PERSISTENT)
            .with_header("attempt", 3)
            .with_header("origin", "billing");

        assert!(!props.is_empty());
        assert_eq!(props.content_type.as_deref(), Some("application/json"));
        assert_eq!(props.delivery_mode, Some(2));

        let headers = props.headers.unwrap();
        assert_eq!(headers.get("attempt"), Some(&FieldValue::I32(3)));
        assert_eq!(
            headers.get("origin"),
            Some(&FieldValue::LongString("billing".to_string()))
        );
    }
}
