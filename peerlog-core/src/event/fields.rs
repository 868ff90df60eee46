//! Ordered, lossless view of a JSON object's top-level fields.
//!
//! [`RawFields`] keeps every top-level key in document order, duplicates
//! included, with its value as the exact source bytes. Nothing below the top
//! level is decoded until a caller asks for it.

use std::fmt;

use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use serde_json::value::RawValue;

use crate::error::ClassifyError;

/// Top-level fields of a JSON object, in document order.
#[derive(Debug)]
pub struct RawFields(Vec<(String, Box<RawValue>)>);

impl RawFields {
    /// Parse the top level of `raw`.
    ///
    /// # Errors
    ///
    /// - [`ClassifyError::InvalidJson`] if `raw` is not JSON at all.
    /// - [`ClassifyError::NotAnObject`] if the top-level value is not an object.
    pub fn parse(raw: &[u8]) -> Result<Self, ClassifyError> {
        serde_json::from_slice::<RawFields>(raw).map_err(|e| {
            if e.is_data() {
                ClassifyError::NotAnObject {
                    found: json_type_name(raw),
                }
            } else {
                ClassifyError::InvalidJson(e)
            }
        })
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RawValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    /// First value whose key equals `name`, ignoring ASCII case.
    pub fn get_ignore_case(&self, name: &str) -> Option<&RawValue> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_ref())
    }

    /// First value whose key, with underscores removed, equals `name`
    /// ignoring ASCII case. `initiator_id`, `InitiatorID` and `initiatorId`
    /// all match `"initiatorid"`.
    pub fn get_loose(&self, name: &str) -> Option<&RawValue> {
        self.position_loose(name).map(|i| self.0[i].1.as_ref())
    }

    pub(crate) fn position_loose(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|(k, _)| loose_eq(k, name))
    }

    pub(crate) fn into_inner(self) -> Vec<(String, Box<RawValue>)> {
        self.0
    }
}

/// Compare a key against a lowercase, underscore-free name.
pub(crate) fn loose_eq(key: &str, name: &str) -> bool {
    let mut key_chars = key.chars().filter(|c| *c != '_');
    let mut name_chars = name.chars();
    loop {
        match (key_chars.next(), name_chars.next()) {
            (None, None) => return true,
            (Some(a), Some(b)) if a.eq_ignore_ascii_case(&b) => {}
            _ => return false,
        }
    }
}

/// Decode a raw value as a string, rendering non-strings as their JSON text.
pub(crate) fn raw_to_string(raw: &RawValue) -> String {
    match serde_json::from_str::<String>(raw.get()) {
        Ok(s) => s,
        Err(_) if raw.get() == "null" => String::new(),
        Err(_) => raw.get().to_string(),
    }
}

/// Name of the JSON type starting `raw`, for error messages.
fn json_type_name(raw: &[u8]) -> &'static str {
    match raw.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'[') => "array",
        Some(b'"') => "string",
        Some(b't' | b'f') => "boolean",
        Some(b'n') => "null",
        Some(b'{') => "object",
        _ => "number",
    }
}

impl<'de> Deserialize<'de> for RawFields {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct FieldsVisitor;

        impl<'de> Visitor<'de> for FieldsVisitor {
            type Value = RawFields;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A>(self, mut map: A) -> Result<RawFields, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut fields = Vec::with_capacity(map.size_hint().unwrap_or(8));
                while let Some((key, value)) = map.next_entry::<String, Box<RawValue>>()? {
                    fields.push((key, value));
                }
                Ok(RawFields(fields))
            }
        }

        deserializer.deserialize_map(FieldsVisitor)
    }
}
