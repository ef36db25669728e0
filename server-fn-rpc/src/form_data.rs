//! FormData payloads
//!
//! An ordered multimap of form fields. POST calls may send a [`FormData`]
//! instead of JSON; the client-side context then travels inside the form as
//! the reserved [`FORM_DATA_CONTEXT_FIELD`] field.

use crate::context::ContextMap;
use serde::{Deserialize, Serialize};

/// Reserved field carrying the serialized client `sendContext`.
pub const FORM_DATA_CONTEXT_FIELD: &str = "__TSR_CONTEXT";

/// Value of a single form field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormValue {
    Text(String),
    File {
        filename: String,
        content_type: Option<String>,
        bytes: Vec<u8>,
    },
}

impl FormValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::File { .. } => None,
        }
    }
}

impl From<String> for FormValue {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for FormValue {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// Ordered form fields; names may repeat.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FormData {
    entries: Vec<(String, FormValue)>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field, keeping existing fields with the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<FormValue>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Builder-style [`FormData::append`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FormValue>) -> Self {
        self.append(name, value);
        self
    }

    /// Replace every field named `name` with a single value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FormValue>) {
        let name = name.into();
        self.delete(&name);
        self.entries.push((name, value.into()));
    }

    /// First value of `name`.
    pub fn get(&self, name: &str) -> Option<&FormValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn get_all(&self, name: &str) -> Vec<&FormValue> {
        self.entries
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v)
            .collect()
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    /// Remove every field named `name`.
    pub fn delete(&mut self, name: &str) {
        self.entries.retain(|(n, _)| n != name);
    }

    /// Remove every field named `name`, returning the first value.
    pub fn take(&mut self, name: &str) -> Option<FormValue> {
        let first = self.get(name).cloned();
        self.delete(name);
        first
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FormValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// JSON view used for cache keys: an array of `[name, value]` pairs.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.entries).unwrap_or_default()
    }

    /// Encode the text fields as `application/x-www-form-urlencoded`.
    ///
    /// File fields cannot be represented in this encoding and are skipped.
    pub fn to_urlencoded(&self) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (name, value) in &self.entries {
            if let Some(text) = value.as_text() {
                serializer.append_pair(name, text);
            }
        }
        serializer.finish()
    }

    /// Decode an `application/x-www-form-urlencoded` body.
    pub fn from_urlencoded(body: &str) -> Self {
        let entries = url::form_urlencoded::parse(body.as_bytes())
            .map(|(name, value)| (name.into_owned(), FormValue::Text(value.into_owned())))
            .collect();
        Self { entries }
    }
}

impl<N: Into<String>, V: Into<FormValue>> FromIterator<(N, V)> for FormData {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        }
    }
}

/// Pull the reserved context field out of an inbound form.
///
/// A missing, non-text or unparsable context field degrades to an empty
/// context; the remaining fields are returned as the call's data.
pub fn extract_form_data_context(mut form: FormData) -> (ContextMap, FormData) {
    let context = match form.take(FORM_DATA_CONTEXT_FIELD) {
        Some(FormValue::Text(serialized)) => {
            match serde_json::from_str::<serde_json::Value>(&serialized) {
                Ok(serde_json::Value::Object(map)) => map,
                Ok(other) => {
                    tracing::warn!(kind = %json_kind(&other), "FormData context is not an object");
                    ContextMap::new()
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse FormData context");
                    ContextMap::new()
                }
            }
        }
        Some(FormValue::File { .. }) => {
            tracing::warn!("FormData context field holds a file");
            ContextMap::new()
        }
        None => ContextMap::new(),
    };
    (context, form)
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_replaces_all_values() {
        let mut form = FormData::new().with("tag", "a").with("tag", "b");
        assert_eq!(form.get_all("tag").len(), 2);

        form.set("tag", "c");
        assert_eq!(form.get_all("tag"), vec![&FormValue::from("c")]);
    }

    #[test]
    fn test_urlencoded_round_trip_keeps_order() {
        let form = FormData::new().with("name", "Ada Lovelace").with("tag", "x&y");
        let encoded = form.to_urlencoded();
        assert_eq!(encoded, "name=Ada+Lovelace&tag=x%26y");
        assert_eq!(FormData::from_urlencoded(&encoded), form);
    }

    #[test]
    fn test_extract_context_removes_field() {
        let form = FormData::new()
            .with("name", "Ada")
            .with(FORM_DATA_CONTEXT_FIELD, json!({"traceId": "t1"}).to_string());

        let (context, data) = extract_form_data_context(form);
        assert_eq!(context.get("traceId"), Some(&json!("t1")));
        assert!(!data.has(FORM_DATA_CONTEXT_FIELD));
        assert_eq!(data.len(), 1);
    }

    #[test]
    fn test_extract_context_degrades_to_empty() {
        let missing = FormData::new().with("name", "Ada");
        let (context, data) = extract_form_data_context(missing);
        assert!(context.is_empty());
        assert_eq!(data.len(), 1);

        let garbage = FormData::new().with(FORM_DATA_CONTEXT_FIELD, "{not json");
        let (context, data) = extract_form_data_context(garbage);
        assert!(context.is_empty());
        assert!(data.is_empty());

        let not_object = FormData::new().with(FORM_DATA_CONTEXT_FIELD, "[1,2]");
        assert!(extract_form_data_context(not_object).0.is_empty());
    }
}
