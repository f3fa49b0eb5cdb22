//! In-memory directory entry store.
//!
//! Entries are keyed by normalized DN in a [`BTreeMap`], which keeps the tree
//! ordered and makes ancestry scans cheap enough for test-sized directories.
//! Operation semantics (parent checks, leaf-only delete, modify value rules)
//! follow what an embedded directory server enforces, so seed data that would
//! be rejected by a real directory is rejected here too.

use std::collections::BTreeMap;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::dn::{DistinguishedName, DistinguishedNameError};
use crate::entry::DirectoryEntry;
use crate::schema::Schema;

/// Attributes maintained by the server rather than the caller. Excluded from
/// `*` attribute selection; returned only when requested by name.
const OPERATIONAL_ATTRIBUTES: &[&str] = &["entryuuid", "createtimestamp", "modifytimestamp"];

/// An attribute modification applied by a `modify` operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Modification {
    /// Add attribute values.
    Add {
        /// Attribute to modify.
        attribute: String,
        /// Values to add.
        values: Vec<String>,
    },
    /// Delete attribute values (empty removes the attribute).
    Delete {
        /// Attribute to modify.
        attribute: String,
        /// Values to delete.
        values: Vec<String>,
    },
    /// Replace attribute values (empty removes the attribute).
    Replace {
        /// Attribute to modify.
        attribute: String,
        /// Replacement values.
        values: Vec<String>,
    },
}

/// Search scope relative to the search base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SearchScope {
    /// The base entry only.
    Base,
    /// Direct children of the base entry.
    OneLevel,
    /// The base entry and everything below it.
    Subtree,
}

/// The filter subset the embedded server evaluates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SearchFilter {
    /// `(attr=*)`
    Present(String),
    /// `(attr=value)`, value compared case-insensitively.
    Equality(String, String),
    /// `(&(..)(..))`
    And(Vec<SearchFilter>),
    /// `(|(..)(..))`
    Or(Vec<SearchFilter>),
    /// `(!(..))`
    Not(Box<SearchFilter>),
}

impl SearchFilter {
    fn matches(&self, entry: &DirectoryEntry) -> bool {
        match self {
            Self::Present(attribute) => entry.has_attribute(attribute),
            Self::Equality(attribute, value) => entry.has_value_ignore_case(attribute, value),
            Self::And(filters) => filters.iter().all(|filter| filter.matches(entry)),
            Self::Or(filters) => filters.iter().any(|filter| filter.matches(entry)),
            Self::Not(filter) => !filter.matches(entry),
        }
    }
}

/// Errors from store operations, mapped to LDAP result codes by the server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum StoreError {
    #[error("no such entry: {0}")]
    NoSuchEntry(String),
    #[error("entry already exists: {0}")]
    EntryExists(String),
    #[error("entry {0} is outside the directory tree")]
    OutsideTree(String),
    #[error("parent entry of {0} does not exist")]
    NoParent(String),
    #[error("entry {0} has children and cannot be deleted")]
    NotLeaf(String),
    #[error("attribute {attribute} of {dn}: no such attribute or value")]
    NoSuchAttribute { dn: String, attribute: String },
    #[error("attribute {attribute} of {dn}: value already exists")]
    ValueExists { dn: String, attribute: String },
    #[error("schema violation: {0}")]
    SchemaViolation(String),
    #[error(transparent)]
    InvalidDn(#[from] DistinguishedNameError),
}

/// The in-memory entry tree backing one embedded directory server.
#[derive(Debug)]
pub(crate) struct DirectoryStore {
    base_dn: DistinguishedName,
    schema: Option<Schema>,
    entries: BTreeMap<String, DirectoryEntry>,
}

impl DirectoryStore {
    /// Creates an empty store rooted at `base_dn`. A schema, when supplied,
    /// is enforced on every subsequent add.
    pub(crate) fn new(
        base_dn: &str,
        schema: Option<Schema>,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            base_dn: DistinguishedName::parse(base_dn)?,
            schema,
            entries: BTreeMap::new(),
        })
    }

    /// The root DN of the tree.
    pub(crate) fn base_dn(&self) -> &DistinguishedName {
        &self.base_dn
    }

    /// Number of entries currently stored.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Point lookup by DN.
    pub(crate) fn get(&self, dn: &str) -> Result<Option<&DirectoryEntry>, StoreError> {
        let parsed = DistinguishedName::parse(dn)?;
        Ok(self.entries.get(&parsed.normalized()))
    }

    /// Adds an entry, maintaining operational attributes.
    pub(crate) fn add(
        &mut self,
        dn: &str,
        attributes: Vec<(String, Vec<String>)>,
    ) -> Result<(), StoreError> {
        let parsed = DistinguishedName::parse(dn)?;
        let key = parsed.normalized();

        if self.entries.contains_key(&key) {
            return Err(StoreError::EntryExists(parsed.as_str().to_string()));
        }
        let is_base = parsed.matches(&self.base_dn);
        if !is_base && !parsed.is_descendant_of(&self.base_dn) {
            return Err(StoreError::OutsideTree(parsed.as_str().to_string()));
        }
        if !is_base {
            let parent = parsed
                .parent()
                .ok_or_else(|| StoreError::NoParent(parsed.as_str().to_string()))?;
            if !self.entries.contains_key(&parent.normalized()) {
                return Err(StoreError::NoParent(parsed.as_str().to_string()));
            }
        }

        if let Some(schema) = &self.schema {
            let object_classes = attributes
                .iter()
                .filter(|(name, _)| name.eq_ignore_ascii_case("objectclass"))
                .flat_map(|(_, values)| values.iter().map(String::as_str));
            let attribute_names = attributes.iter().map(|(name, _)| name.as_str());
            schema
                .check_entry(object_classes, attribute_names)
                .map_err(StoreError::SchemaViolation)?;
        }

        let mut entry = DirectoryEntry::new(parsed.as_str());
        for (name, values) in attributes {
            entry.add_values(&name, values);
        }
        let now = timestamp();
        entry.replace_values("entryUUID", vec![Uuid::new_v4().to_string()]);
        entry.replace_values("createTimestamp", vec![now.clone()]);
        entry.replace_values("modifyTimestamp", vec![now]);

        self.entries.insert(key, entry);
        Ok(())
    }

    /// Deletes a leaf entry.
    pub(crate) fn delete(&mut self, dn: &str) -> Result<(), StoreError> {
        let parsed = DistinguishedName::parse(dn)?;
        let key = parsed.normalized();
        if !self.entries.contains_key(&key) {
            return Err(StoreError::NoSuchEntry(parsed.as_str().to_string()));
        }
        let child_suffix = format!(",{key}");
        if self.entries.keys().any(|other| other.ends_with(&child_suffix)) {
            return Err(StoreError::NotLeaf(parsed.as_str().to_string()));
        }
        self.entries.remove(&key);
        Ok(())
    }

    /// Applies a sequence of modifications atomically: either all succeed or
    /// the entry is left untouched.
    pub(crate) fn modify(
        &mut self,
        dn: &str,
        modifications: &[Modification],
    ) -> Result<(), StoreError> {
        let parsed = DistinguishedName::parse(dn)?;
        let key = parsed.normalized();
        let current = self
            .entries
            .get(&key)
            .ok_or_else(|| StoreError::NoSuchEntry(parsed.as_str().to_string()))?;

        let mut updated = current.clone();
        for modification in modifications {
            match modification {
                Modification::Add { attribute, values } => {
                    let duplicates = updated.add_values(attribute, values.clone());
                    if !duplicates.is_empty() {
                        return Err(StoreError::ValueExists {
                            dn: parsed.as_str().to_string(),
                            attribute: attribute.clone(),
                        });
                    }
                }
                Modification::Delete { attribute, values } => {
                    if !updated.remove_values(attribute, values) {
                        return Err(StoreError::NoSuchAttribute {
                            dn: parsed.as_str().to_string(),
                            attribute: attribute.clone(),
                        });
                    }
                }
                Modification::Replace { attribute, values } => {
                    updated.replace_values(attribute, values.clone());
                }
            }
        }
        updated.replace_values("modifyTimestamp", vec![timestamp()]);

        self.entries.insert(key, updated);
        Ok(())
    }

    /// Scoped, filtered search. The attribute list follows directory rules:
    /// empty or `*` selects user attributes, operational attributes appear
    /// only when requested by name.
    pub(crate) fn search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &SearchFilter,
        attributes: &[String],
    ) -> Result<Vec<DirectoryEntry>, StoreError> {
        let parsed = DistinguishedName::parse(base)?;
        let base_key = parsed.normalized();
        if !self.entries.contains_key(&base_key) {
            return Err(StoreError::NoSuchEntry(parsed.as_str().to_string()));
        }

        let mut results = Vec::new();
        for entry in self.entries.values() {
            let entry_dn = DistinguishedName::parse(entry.dn())?;
            let in_scope = match scope {
                SearchScope::Base => entry_dn.matches(&parsed),
                SearchScope::OneLevel => entry_dn
                    .parent()
                    .is_some_and(|parent| parent.matches(&parsed)),
                SearchScope::Subtree => {
                    entry_dn.matches(&parsed) || entry_dn.is_descendant_of(&parsed)
                }
            };
            if in_scope && filter.matches(entry) {
                results.push(select(entry, attributes));
            }
        }
        Ok(results)
    }
}

/// Projects an entry onto the requested attribute list.
fn select(entry: &DirectoryEntry, attributes: &[String]) -> DirectoryEntry {
    let all_user = attributes.is_empty() || attributes.iter().any(|attr| attr == "*");
    let mut projected = DirectoryEntry::new(entry.dn());
    for attribute in entry.attributes() {
        let lower = attribute.name().to_ascii_lowercase();
        let operational = OPERATIONAL_ATTRIBUTES.contains(&lower.as_str());
        let named = attributes
            .iter()
            .any(|requested| requested.eq_ignore_ascii_case(attribute.name()));
        if (all_user && !operational) || named {
            projected.add_values(attribute.name(), attribute.values().to_vec());
        }
    }
    projected
}

fn timestamp() -> String {
    Utc::now().format("%Y%m%d%H%M%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_store() -> DirectoryStore {
        let mut store = DirectoryStore::new("dc=example,dc=com", None).unwrap();
        store
            .add(
                "dc=example,dc=com",
                vec![
                    (
                        "objectclass".to_string(),
                        vec!["domain".to_string(), "top".to_string()],
                    ),
                    ("dc".to_string(), vec!["example".to_string()]),
                ],
            )
            .unwrap();
        store
            .add(
                "ou=People,dc=example,dc=com",
                vec![
                    (
                        "objectclass".to_string(),
                        vec!["organizationalUnit".to_string(), "top".to_string()],
                    ),
                    ("ou".to_string(), vec!["People".to_string()]),
                ],
            )
            .unwrap();
        store
    }

    #[test]
    fn add_requires_existing_parent() {
        let mut store = seeded_store();
        let err = store
            .add(
                "uid=jdoe,ou=Ghost,dc=example,dc=com",
                vec![("uid".to_string(), vec!["jdoe".to_string()])],
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::NoParent(_)));
    }

    #[test]
    fn add_rejects_duplicates_and_strays() {
        let mut store = seeded_store();
        let err = store
            .add(
                "OU=people,dc=example,dc=com",
                vec![("ou".to_string(), vec!["People".to_string()])],
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::EntryExists(_)));

        let err = store
            .add(
                "dc=other,dc=net",
                vec![("dc".to_string(), vec!["other".to_string()])],
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::OutsideTree(_)));
    }

    #[test]
    fn delete_is_leaf_only() {
        let mut store = seeded_store();
        let err = store.delete("dc=example,dc=com").unwrap_err();
        assert!(matches!(err, StoreError::NotLeaf(_)));

        store.delete("ou=People,dc=example,dc=com").unwrap();
        assert_eq!(store.len(), 1);
        assert!(matches!(
            store.delete("ou=People,dc=example,dc=com").unwrap_err(),
            StoreError::NoSuchEntry(_)
        ));
    }

    #[test]
    fn modify_is_atomic() {
        let mut store = seeded_store();
        // Second modification fails, so the first must not stick.
        let err = store
            .modify(
                "ou=People,dc=example,dc=com",
                &[
                    Modification::Add {
                        attribute: "description".to_string(),
                        values: vec!["humans".to_string()],
                    },
                    Modification::Delete {
                        attribute: "missing".to_string(),
                        values: Vec::new(),
                    },
                ],
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::NoSuchAttribute { .. }));

        let entry = store.get("ou=People,dc=example,dc=com").unwrap().unwrap();
        assert!(!entry.has_attribute("description"));
    }

    #[test]
    fn modify_value_rules() {
        let mut store = seeded_store();
        let err = store
            .modify(
                "ou=People,dc=example,dc=com",
                &[Modification::Add {
                    attribute: "ou".to_string(),
                    values: vec!["People".to_string()],
                }],
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::ValueExists { .. }));

        store
            .modify(
                "ou=People,dc=example,dc=com",
                &[Modification::Replace {
                    attribute: "description".to_string(),
                    values: vec!["all people".to_string()],
                }],
            )
            .unwrap();
        let entry = store.get("ou=People,dc=example,dc=com").unwrap().unwrap();
        assert_eq!(entry.first("description"), Some("all people"));
    }

    #[test]
    fn search_scopes() {
        let mut store = seeded_store();
        store
            .add(
                "uid=jdoe,ou=People,dc=example,dc=com",
                vec![
                    ("objectclass".to_string(), vec!["person".to_string()]),
                    ("uid".to_string(), vec!["jdoe".to_string()]),
                ],
            )
            .unwrap();

        let all = SearchFilter::Present("objectclass".to_string());
        let base = store
            .search("dc=example,dc=com", SearchScope::Base, &all, &[])
            .unwrap();
        assert_eq!(base.len(), 1);

        let one = store
            .search("dc=example,dc=com", SearchScope::OneLevel, &all, &[])
            .unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].dn(), "ou=People,dc=example,dc=com");

        let sub = store
            .search("dc=example,dc=com", SearchScope::Subtree, &all, &[])
            .unwrap();
        assert_eq!(sub.len(), 3);

        let err = store
            .search("ou=Ghost,dc=example,dc=com", SearchScope::Base, &all, &[])
            .unwrap_err();
        assert!(matches!(err, StoreError::NoSuchEntry(_)));
    }

    #[test]
    fn search_filters() {
        let store = seeded_store();
        let people = SearchFilter::Equality(
            "objectclass".to_string(),
            "ORGANIZATIONALUNIT".to_string(),
        );
        let found = store
            .search("dc=example,dc=com", SearchScope::Subtree, &people, &[])
            .unwrap();
        assert_eq!(found.len(), 1);

        let not_people = SearchFilter::Not(Box::new(people));
        let found = store
            .search("dc=example,dc=com", SearchScope::Subtree, &not_people, &[])
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].dn(), "dc=example,dc=com");
    }

    #[test]
    fn operational_attributes_only_on_request() {
        let store = seeded_store();
        let all = SearchFilter::Present("objectclass".to_string());

        let plain = store
            .search("dc=example,dc=com", SearchScope::Base, &all, &[])
            .unwrap();
        assert!(!plain[0].has_attribute("entryUUID"));
        assert!(plain[0].has_attribute("dc"));

        let requested = store
            .search(
                "dc=example,dc=com",
                SearchScope::Base,
                &all,
                &["entryUUID".to_string()],
            )
            .unwrap();
        assert!(requested[0].has_attribute("entryUUID"));
        assert!(!requested[0].has_attribute("dc"));
    }

    #[test]
    fn schema_enforcement_on_add() {
        let mut store =
            DirectoryStore::new("dc=example,dc=com", Some(Schema::standard())).unwrap();
        store
            .add(
                "dc=example,dc=com",
                vec![
                    (
                        "objectclass".to_string(),
                        vec!["domain".to_string(), "top".to_string()],
                    ),
                    ("dc".to_string(), vec!["example".to_string()]),
                ],
            )
            .unwrap();

        let err = store
            .add(
                "ou=Lab,dc=example,dc=com",
                vec![(
                    "objectclass".to_string(),
                    vec!["flyingSaucer".to_string()],
                )],
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::SchemaViolation(_)));
    }
}
