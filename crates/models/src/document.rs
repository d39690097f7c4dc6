use serde_json::Value;
use std::collections::BTreeMap;

/// In-memory wire form of a stored record: a schema-light field map.
/// Datasets are additive, so consumers pair this with a typed view over
/// exactly the fields they read (see `views`).
pub type Document = BTreeMap<String, Value>;

/// Read a field as a string, treating missing, null, and non-string values
/// as empty. Source rows are parsed as strings so this covers them all.
pub fn str_field<'d>(doc: &'d Document, field: &str) -> &'d str {
    match doc.get(field) {
        Some(Value::String(s)) => s.as_str(),
        _ => "",
    }
}

/// Read a field as a string, distinguishing absent/null from present.
pub fn opt_str_field<'d>(doc: &'d Document, field: &str) -> Option<&'d str> {
    match doc.get(field) {
        Some(Value::String(s)) => Some(s.as_str()),
        _ => None,
    }
}

/// Split a `;`-joined list field into trimmed, non-empty entries.
pub fn list_field(doc: &Document, field: &str) -> Vec<String> {
    str_field(doc, field)
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Serialize a typed record into its stored document form.
pub fn to_document<T: serde::Serialize>(value: &T) -> Result<Document, serde_json::Error> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => Err(serde::ser::Error::custom(format!(
            "expected an object, got {other}"
        ))),
    }
}

/// Deserialize a stored document back into its typed form.
pub fn from_document<T: serde::de::DeserializeOwned>(
    doc: &Document,
) -> Result<T, serde_json::Error> {
    let map: serde_json::Map<String, Value> =
        doc.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    serde_json::from_value(Value::Object(map))
}
