use std::fmt;

use serde_json::Value;

/// A dotted field selector such as `bookingDetails.checkIn`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<String>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> Self {
        let segments = if raw.is_empty() {
            vec![]
        } else {
            raw.split('.').map(str::to_string).collect()
        };

        Self {
            raw: raw.to_string(),
            segments,
        }
    }

    /// The path that resolves to the document itself.
    pub fn root() -> Self {
        Self::parse("")
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Look the path up in `doc`.
    ///
    /// A numeric segment indexes into an array; any other segment applied
    /// to an array is mapped over its elements, keeping the elements where
    /// it resolves. Returns `None` when nothing resolves.
    pub fn resolve(&self, doc: &Value) -> Option<Value> {
        resolve(doc, &self.segments)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn resolve(value: &Value, segments: &[String]) -> Option<Value> {
    let Some((head, rest)) = segments.split_first() else {
        return Some(value.clone());
    };

    match value {
        Value::Object(map) => map.get(head).and_then(|v| resolve(v, rest)),
        Value::Array(items) => {
            if let Ok(index) = head.parse::<usize>() {
                return items.get(index).and_then(|v| resolve(v, rest));
            }

            let mapped: Vec<Value> = items
                .iter()
                .filter_map(|item| resolve(item, segments))
                .collect();
            if mapped.is_empty() {
                None
            } else {
                Some(Value::Array(mapped))
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "bookingDetails": { "checkIn": "2024-05-15T15:00:00Z", "guests": 2 },
            "serviceDetails": [
                { "serviceName": "Spa", "price": 200.0 },
                { "serviceName": "Breakfast", "price": 50.0 },
                { "note": "no name" }
            ]
        })
    }

    #[test]
    fn test_nested_object() {
        let path = FieldPath::parse("bookingDetails.checkIn");
        assert_eq!(path.resolve(&doc()), Some(json!("2024-05-15T15:00:00Z")));
    }

    #[test]
    fn test_missing_field() {
        assert_eq!(FieldPath::parse("bookingDetails.checkOut").resolve(&doc()), None);
        assert_eq!(FieldPath::parse("bookingDetails.guests.x").resolve(&doc()), None);
    }

    #[test]
    fn test_array_index() {
        let path = FieldPath::parse("serviceDetails.1.serviceName");
        assert_eq!(path.resolve(&doc()), Some(json!("Breakfast")));
        assert_eq!(FieldPath::parse("serviceDetails.9").resolve(&doc()), None);
    }

    #[test]
    fn test_array_mapping_skips_unresolved() {
        let path = FieldPath::parse("serviceDetails.serviceName");
        assert_eq!(path.resolve(&doc()), Some(json!(["Spa", "Breakfast"])));
    }

    #[test]
    fn test_root_is_whole_document() {
        assert_eq!(FieldPath::root().resolve(&json!(5)), Some(json!(5)));
        assert_eq!(FieldPath::root().as_str(), "");
    }
}
