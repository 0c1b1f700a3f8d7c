//! Record types for imported rows.
//!
//! A [`Record`] is an untyped JSON object. Column names may be dot-paths
//! (`"address.city"`), which expand into nested objects on insert and
//! collapse back with [`Record::flatten`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the field carrying record identity.
pub const ID_FIELD: &str = "id";

/// Identifier of a record within a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Identifier {
    Int(i64),
    Str(String),
}

impl Identifier {
    /// Read an identifier out of a JSON value.
    ///
    /// Integers and non-empty strings are identifiers. Other numbers keep
    /// their decimal text. `null`, `""`, booleans, arrays and objects are not.
    ///
    /// A string spelling an integer canonically (`"42"`, not `"042"`) is read
    /// as that integer, so untyped CSV cells match numeric store ids.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => Some(match n.as_i64() {
                Some(i) => Identifier::Int(i),
                None => Identifier::Str(n.to_string()),
            }),
            Value::String(s) if !s.is_empty() => Some(
                match s.parse::<i64>().ok().filter(|i| i.to_string() == *s) {
                    Some(i) => Identifier::Int(i),
                    None => Identifier::Str(s.clone()),
                },
            ),
            _ => None,
        }
    }

    /// Convert back into a JSON value.
    pub fn to_value(&self) -> Value {
        match self {
            Identifier::Int(i) => Value::from(*i),
            Identifier::Str(s) => Value::from(s.as_str()),
        }
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Identifier::Int(i) => write!(f, "{}", i),
            Identifier::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Identifier {
    fn from(value: i64) -> Self {
        Identifier::Int(value)
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Identifier::Str(value.to_string())
    }
}

impl From<String> for Identifier {
    fn from(value: String) -> Self {
        Identifier::Str(value)
    }
}

/// A single imported row.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wrap an existing JSON object.
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// The record's identifier, if it carries one.
    pub fn id(&self) -> Option<Identifier> {
        self.0.get(ID_FIELD).and_then(Identifier::from_value)
    }

    /// Whether the record carries an identifier.
    pub fn has_id(&self) -> bool {
        self.id().is_some()
    }

    /// Shallow copy with the `id` field removed.
    pub fn without_id(&self) -> Self {
        let mut map = self.0.clone();
        map.remove(ID_FIELD);
        Self(map)
    }

    /// Top-level field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Set a top-level field.
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    /// Look up a dot-path (`"address.city"`).
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut keys = path.split('.');
        let first = keys.next()?;
        let mut current = self.0.get(first)?;
        for key in keys {
            current = current.as_object()?.get(key)?;
        }
        Some(current)
    }

    /// Insert a value at a dot-path, creating intermediate objects.
    ///
    /// An intermediate that is not an object is replaced by an empty object.
    /// An empty path is ignored.
    pub fn insert_path(&mut self, path: &str, value: Value) {
        if path.is_empty() {
            return;
        }
        let mut keys: Vec<&str> = path.split('.').collect();
        let last = keys.pop().unwrap_or(path);
        let mut current = &mut self.0;
        for key in keys {
            let slot = current
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            let Value::Object(map) = slot else {
                return;
            };
            current = map;
        }
        current.insert(last.to_string(), value);
    }

    /// Collapse nested objects into `(dot.path, leaf)` pairs.
    ///
    /// Inverse of [`Record::insert_path`]: arrays, scalars and empty objects
    /// are leaves.
    pub fn flatten(&self) -> Vec<(String, Value)> {
        let mut out = Vec::new();
        for (key, value) in &self.0 {
            flatten_into(key.clone(), value, &mut out);
        }
        out
    }

    /// Number of top-level fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the underlying object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Convert into a JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

fn flatten_into(prefix: String, value: &Value, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, nested) in map {
                flatten_into(format!("{}.{}", prefix, key), nested, out);
            }
        }
        leaf => out.push((prefix, leaf.clone())),
    }
}

impl FromIterator<(String, Value)> for Record {
    /// Build a record from dot-path columns.
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (path, value) in iter {
            record.insert_path(&path, value);
        }
        record
    }
}

impl TryFrom<Value> for Record {
    type Error = Value;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Record(map)),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        Record::try_from(value).unwrap()
    }

    #[test]
    fn identifier_from_values() {
        assert_eq!(Identifier::from_value(&json!(5)), Some(Identifier::Int(5)));
        assert_eq!(Identifier::from_value(&json!(0)), Some(Identifier::Int(0)));
        assert_eq!(
            Identifier::from_value(&json!("abc")),
            Some(Identifier::Str("abc".into()))
        );
        assert_eq!(
            Identifier::from_value(&json!(1.5)),
            Some(Identifier::Str("1.5".into()))
        );
        assert_eq!(Identifier::from_value(&json!("42")), Some(Identifier::Int(42)));
        assert_eq!(
            Identifier::from_value(&json!("042")),
            Some(Identifier::Str("042".into()))
        );
        assert_eq!(Identifier::from_value(&json!("")), None);
        assert_eq!(Identifier::from_value(&Value::Null), None);
        assert_eq!(Identifier::from_value(&json!(true)), None);
        assert_eq!(Identifier::from_value(&json!({"a": 1})), None);
    }

    #[test]
    fn record_identity() {
        let r = record(json!({"id": 5, "title": "Z"}));
        assert_eq!(r.id(), Some(Identifier::Int(5)));

        let stripped = r.without_id();
        assert!(stripped.get("id").is_none());
        assert_eq!(stripped.get("title"), Some(&json!("Z")));
        // original untouched
        assert!(r.has_id());

        assert!(!record(json!({"id": "", "title": "x"})).has_id());
        assert!(!record(json!({"title": "x"})).has_id());
    }

    #[test]
    fn insert_nested_paths() {
        let mut r = Record::new();
        r.insert_path("address.city", json!("Oslo"));
        r.insert_path("address.zip", json!("0150"));
        r.insert_path("name", json!("Ada"));
        r.insert_path("", json!("ignored"));

        assert_eq!(
            r.into_value(),
            json!({"address": {"city": "Oslo", "zip": "0150"}, "name": "Ada"})
        );
    }

    #[test]
    fn insert_replaces_scalar_intermediate() {
        let mut r = record(json!({"a": "scalar"}));
        r.insert_path("a.b", json!(1));
        assert_eq!(r.get_path("a.b"), Some(&json!(1)));
    }

    #[test]
    fn flatten_inverts_insert() {
        let columns = vec![
            ("id".to_string(), json!("1")),
            ("meta.tags".to_string(), json!(["a", "b"])),
            ("meta.author.name".to_string(), json!("Ada")),
        ];
        let r: Record = columns.clone().into_iter().collect();

        let mut flat = r.flatten();
        flat.sort_by(|a, b| a.0.cmp(&b.0));
        let mut expected = columns;
        expected.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(flat, expected);
    }

    #[test]
    fn get_path_misses() {
        let r = record(json!({"a": {"b": 1}}));
        assert_eq!(r.get_path("a.b"), Some(&json!(1)));
        assert_eq!(r.get_path("a.c"), None);
        assert_eq!(r.get_path("a.b.c"), None);
    }

    #[test]
    fn serialization_is_transparent() {
        let r = record(json!({"id": 1, "title": "New"}));
        let text = serde_json::to_string(&r).unwrap();
        assert_eq!(text, r#"{"id":1,"title":"New"}"#);
        let parsed: Record = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, r);
    }
}
