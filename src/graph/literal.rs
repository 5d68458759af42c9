use std::fmt;

use ordered_float::OrderedFloat;
use serde::Serialize;
use serde_json::Value;

/// Scalar value carried by defaults, constants and enum cases.
///
/// Totally ordered and hashable so it can key interning maps and structural
/// comparisons. Composite JSON (arrays/objects) is kept as canonical text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum Literal {
    Null,
    Bool(bool),
    Integer(i64),
    Number(OrderedFloat<f64>),
    String(String),
    Raw(String),
}

impl Literal {
    pub fn from_json(v: &Value) -> Self {
        match v {
            Value::Null => Literal::Null,
            Value::Bool(b) => Literal::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Literal::Integer(i)
                } else if let Some(f) = n.as_f64() {
                    Literal::Number(OrderedFloat(f))
                } else {
                    Literal::Raw(n.to_string())
                }
            }
            Value::String(s) => Literal::String(s.clone()),
            // serde_json with preserve_order keeps source key order, which is
            // exactly what we want for a stable textual key.
            Value::Array(_) | Value::Object(_) => Literal::Raw(v.to_string()),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Integer(i) => Value::from(*i),
            Literal::Number(f) => Value::from(f.0),
            Literal::String(s) => Value::String(s.clone()),
            Literal::Raw(text) => serde_json::from_str(text).unwrap_or(Value::Null),
        }
    }

    /// Text used when deriving identifiers (enum case names, tags).
    pub fn display_text(&self) -> String {
        match self {
            Literal::Null => "null".to_string(),
            Literal::Bool(b) => b.to_string(),
            Literal::Integer(i) => i.to_string(),
            Literal::Number(f) => f.0.to_string(),
            Literal::String(s) => s.clone(),
            Literal::Raw(text) => text.clone(),
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Literal::String(_))
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(s) => write!(f, "{s:?}"),
            other => f.write_str(&other.display_text()),
        }
    }
}

impl From<&str> for Literal {
    fn from(s: &str) -> Self {
        Literal::String(s.to_string())
    }
}

impl From<i64> for Literal {
    fn from(i: i64) -> Self {
        Literal::Integer(i)
    }
}
