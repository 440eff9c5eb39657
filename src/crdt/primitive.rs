//! Leaf values.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use smartstring::alias::String as SmartString;

use crate::crdt::root::DataSize;
use crate::rht::utf16_len;

/// An immutable leaf. The numeric split follows the wire format: plain JSON
/// numbers land as `Integer`/`Double`, 64 bit integers as `Long`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Primitive {
    Null,
    Boolean(bool),
    Integer(i32),
    Long(i64),
    Double(f64),
    Str(SmartString),
    Bytes(Vec<u8>),
    /// Milliseconds since the epoch.
    Date(i64),
}

impl Primitive {
    pub fn from_json(value: &Json) -> Option<Primitive> {
        Some(match value {
            Json::Null => Primitive::Null,
            Json::Bool(b) => Primitive::Boolean(*b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    if i >= i32::MIN as i64 && i <= i32::MAX as i64 {
                        Primitive::Integer(i as i32)
                    } else {
                        Primitive::Long(i)
                    }
                } else {
                    Primitive::Double(n.as_f64()?)
                }
            }
            Json::String(s) => Primitive::Str(s.as_str().into()),
            // Objects and arrays build structured elements, not primitives.
            Json::Array(_) | Json::Object(_) => return None,
        })
    }

    pub fn to_json(&self) -> Json {
        match self {
            Primitive::Null => Json::Null,
            Primitive::Boolean(b) => Json::from(*b),
            Primitive::Integer(i) => Json::from(*i),
            Primitive::Long(l) => Json::from(*l),
            Primitive::Double(d) => serde_json::Number::from_f64(*d)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Primitive::Str(s) => Json::from(s.as_str()),
            Primitive::Bytes(b) => Json::from(b.clone()),
            Primitive::Date(ms) => Json::from(*ms),
        }
    }

    pub fn data_size(&self) -> DataSize {
        let data = match self {
            Primitive::Null => 0,
            Primitive::Boolean(_) => 4,
            Primitive::Integer(_) => 4,
            Primitive::Long(_) => 8,
            Primitive::Double(_) => 8,
            Primitive::Str(s) => 2 * utf16_len(s) as i64,
            Primitive::Bytes(b) => b.len() as i64,
            Primitive::Date(_) => 8,
        };
        DataSize { data, meta: 0 }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn from_json_numeric_split() {
        assert_eq!(Primitive::from_json(&serde_json::json!(7)), Some(Primitive::Integer(7)));
        assert_eq!(
            Primitive::from_json(&serde_json::json!(5_000_000_000i64)),
            Some(Primitive::Long(5_000_000_000))
        );
        assert_eq!(Primitive::from_json(&serde_json::json!(1.5)), Some(Primitive::Double(1.5)));
        assert_eq!(Primitive::from_json(&serde_json::json!({"a": 1})), None);
    }
}
