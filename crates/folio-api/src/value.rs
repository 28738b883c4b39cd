/// Literal value carried by selectors and compared against document fields.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    String(String),
    Integer(i64),
    Boolean(bool),
    Null,
}

impl Value {
    /// Create a Value from a scalar serde_json::Value.
    ///
    /// Objects, arrays and non-integral numbers have no literal representation
    /// and map to `None`.
    pub fn from_json_value(v: &serde_json::Value) -> Option<Self> {
        match v {
            serde_json::Value::Null => Some(Value::Null),
            serde_json::Value::Bool(b) => Some(Value::Boolean(*b)),
            serde_json::Value::Number(n) => n.as_i64().map(Value::Integer),
            serde_json::Value::String(s) => Some(Value::String(s.clone())),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_value_scalars() {
        assert_eq!(Value::from_json_value(&json!(null)), Some(Value::Null));
        assert_eq!(Value::from_json_value(&json!(7)), Some(Value::Integer(7)));
        assert_eq!(Value::from_json_value(&json!(true)), Some(Value::Boolean(true)));
        assert_eq!(
            Value::from_json_value(&json!("en")),
            Some(Value::String("en".to_string()))
        );
    }

    #[test]
    fn test_from_json_value_rejects_compound_and_fractional() {
        assert_eq!(Value::from_json_value(&json!({"a": 1})), None);
        assert_eq!(Value::from_json_value(&json!(["en"])), None);
        assert_eq!(Value::from_json_value(&json!(1.5)), None);
    }
}
