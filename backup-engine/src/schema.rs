//! Versioned registry of the collections a snapshot covers, and the
//! sensitive fields stripped from snapshots taken without `includeSensitive`.
//!
//! Adding a collection or a sensitive field is a one-line change here; bump
//! [`SCHEMA_VERSION`] whenever the list changes.

use crate::store::Document;
use serde_json::Value;

pub const SCHEMA_VERSION: u32 = 4;

/// Field names removed at any depth of any document.
pub const GLOBAL_SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "passwordHash",
    "refreshToken",
    "accessToken",
    "apiKey",
];

#[derive(Debug, Clone, Copy)]
pub struct CollectionSpec {
    pub name: &'static str,
    pub id_field: &'static str,
    /// Dotted paths from the document root.
    pub sensitive_paths: &'static [&'static str],
}

const fn collection(
    name: &'static str,
    sensitive_paths: &'static [&'static str],
) -> CollectionSpec {
    CollectionSpec {
        name,
        id_field: "_id",
        sensitive_paths,
    }
}

pub const COLLECTIONS: &[CollectionSpec] = &[
    collection(
        "users",
        &[
            "resetPasswordToken",
            "resetPasswordExpires",
            "emailVerificationToken",
            "twoFactor.secret",
            "twoFactor.backupCodes",
        ],
    ),
    collection("teams", &["inviteCode"]),
    collection("athletes", &[]),
    collection("matchreports", &[]),
    collection("scoutingreports", &[]),
    // Verifier and wrapped key are both needed to unlock after a restore.
    collection("teamencryptionconfigs", &[]),
    collection("invitations", &["token"]),
    collection("sessions", &["token"]),
    collection("notifications", &[]),
    collection("auditlogs", &[]),
];

/// The set of collections an engine instance works with.
#[derive(Debug, Clone)]
pub struct Registry {
    version: u32,
    collections: Vec<CollectionSpec>,
    global_sensitive: Vec<&'static str>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION,
            collections: COLLECTIONS.to_vec(),
            global_sensitive: GLOBAL_SENSITIVE_FIELDS.to_vec(),
        }
    }
}

impl Registry {
    pub fn new(
        version: u32,
        collections: Vec<CollectionSpec>,
        global_sensitive: Vec<&'static str>,
    ) -> Self {
        Self {
            version,
            collections,
            global_sensitive,
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn collections(&self) -> &[CollectionSpec] {
        &self.collections
    }

    pub fn get(&self, name: &str) -> Option<&CollectionSpec> {
        self.collections.iter().find(|c| c.name == name)
    }

    /// Strip every sensitive field of `spec` from `document`.
    pub fn redact(&self, spec: &CollectionSpec, document: &mut Document) {
        for path in spec.sensitive_paths {
            remove_path(document, path);
        }
        for field in &self.global_sensitive {
            remove_everywhere(document, field);
        }
    }

    /// Copy the fields [`Registry::redact`] would strip from `source` into
    /// `target`, leaving everything else in `target` untouched. Global fields
    /// are matched at any depth; array elements pair up by position.
    pub fn carry_over_redacted(&self, spec: &CollectionSpec, source: &Document, target: &mut Document) {
        for path in spec.sensitive_paths {
            if let Some(value) = lookup_path(source, path) {
                if lookup_path(target, path).is_none() {
                    insert_path(target, path, value.clone());
                }
            }
        }
        for field in &self.global_sensitive {
            carry_everywhere(source, target, field);
        }
    }
}

fn remove_path(document: &mut Document, path: &str) {
    let mut parts = path.split('.').peekable();
    let mut current = document;
    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            current.remove(part);
            return;
        }
        match current.get_mut(part) {
            Some(Value::Object(next)) => current = next,
            _ => return,
        }
    }
}

fn lookup_path<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut value = document.get(first)?;
    for part in parts {
        value = value.as_object()?.get(part)?;
    }
    Some(value)
}

fn insert_path(document: &mut Document, path: &str, value: Value) {
    let parts: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = parts.split_last() else {
        return;
    };
    let mut current = document;
    for part in parents {
        let entry = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Document::new()));
        match entry {
            Value::Object(next) => current = next,
            _ => return,
        }
    }
    current.insert(last.to_string(), value);
}

fn remove_everywhere(document: &mut Document, field: &str) {
    document.remove(field);
    for value in document.values_mut() {
        remove_in_value(value, field);
    }
}

fn remove_in_value(value: &mut Value, field: &str) {
    match value {
        Value::Object(map) => remove_everywhere(map, field),
        Value::Array(items) => {
            for item in items {
                remove_in_value(item, field);
            }
        }
        _ => {}
    }
}

fn carry_everywhere(source: &Document, target: &mut Document, field: &str) {
    if let Some(value) = source.get(field) {
        target.entry(field.to_string()).or_insert_with(|| value.clone());
    }
    for (key, value) in target.iter_mut() {
        if key == field {
            continue;
        }
        if let Some(source_value) = source.get(key) {
            carry_in_value(source_value, value, field);
        }
    }
}

fn carry_in_value(source: &Value, target: &mut Value, field: &str) {
    match (source, target) {
        (Value::Object(from), Value::Object(to)) => carry_everywhere(from, to, field),
        (Value::Array(from), Value::Array(to)) => {
            for (from, to) in from.iter().zip(to.iter_mut()) {
                carry_in_value(from, to, field);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_registry_has_unique_names() {
        let registry = Registry::default();
        let mut names: Vec<_> = registry.collections().iter().map(|c| c.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), registry.collections().len());
        assert!(registry.get("users").is_some());
        assert!(registry.get("unknown").is_none());
    }

    #[test]
    fn test_redact_paths_and_global_fields() {
        let registry = Registry::default();
        let spec = registry.get("users").unwrap();
        let mut user = doc(json!({
            "_id": "u1",
            "email": "coach@example.com",
            "passwordHash": "$2b$10$abc",
            "resetPasswordToken": "tok",
            "twoFactor": {"enabled": true, "secret": "JBSWY3DP"},
            "devices": [{"name": "phone", "refreshToken": "r1"}],
            "profile": {"settings": {"apiKey": "k"}}
        }));

        registry.redact(spec, &mut user);

        assert_eq!(
            Value::Object(user),
            json!({
                "_id": "u1",
                "email": "coach@example.com",
                "twoFactor": {"enabled": true},
                "devices": [{"name": "phone"}],
                "profile": {"settings": {}}
            })
        );
    }

    #[test]
    fn test_redact_missing_path_is_noop() {
        let registry = Registry::default();
        let spec = registry.get("users").unwrap();
        let mut user = doc(json!({"_id": "u1", "twoFactor": "disabled"}));
        registry.redact(spec, &mut user);
        assert_eq!(user["twoFactor"], "disabled");
    }

    #[test]
    fn test_carry_over_redacted() {
        let registry = Registry::default();
        let spec = registry.get("users").unwrap();
        let existing = doc(json!({
            "_id": "u1",
            "email": "old@example.com",
            "passwordHash": "hash",
            "twoFactor": {"enabled": true, "secret": "S"}
        }));
        let mut incoming = doc(json!({
            "_id": "u1",
            "email": "new@example.com",
            "twoFactor": {"enabled": true}
        }));

        registry.carry_over_redacted(spec, &existing, &mut incoming);

        assert_eq!(incoming["email"], "new@example.com");
        assert_eq!(incoming["passwordHash"], "hash");
        assert_eq!(incoming["twoFactor"]["secret"], "S");
    }

    #[test]
    fn test_carry_over_nested_global_fields() {
        let registry = Registry::default();
        let spec = registry.get("users").unwrap();
        let existing = doc(json!({
            "_id": "u1",
            "devices": [{"name": "phone", "refreshToken": "r1"}, {"name": "tablet", "refreshToken": "r2"}],
            "profile": {"settings": {"theme": "dark", "apiKey": "k"}}
        }));
        let mut incoming = existing.clone();
        registry.redact(spec, &mut incoming);
        incoming["profile"]["settings"]["theme"] = json!("light");

        registry.carry_over_redacted(spec, &existing, &mut incoming);

        assert_eq!(incoming["devices"][0]["refreshToken"], "r1");
        assert_eq!(incoming["devices"][1]["refreshToken"], "r2");
        assert_eq!(incoming["profile"]["settings"]["apiKey"], "k");
        assert_eq!(incoming["profile"]["settings"]["theme"], "light");
    }
}
