//! Directory entry representation.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A single attribute: the name as first written, plus its values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    name: String,
    values: Vec<String>,
}

impl Attribute {
    /// Creates an attribute with the given name and values.
    #[must_use]
    pub fn new(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Attribute name with its original capitalization.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attribute values in insertion order.
    #[must_use]
    pub fn values(&self) -> &[String] {
        &self.values
    }
}

/// A directory entry: a distinguished name plus its attributes.
///
/// Attribute names are matched case-insensitively, as the directory does.
/// Values keep their original case and order; comparisons that the directory
/// defines as set-based use [`DirectoryEntry::value_set`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DirectoryEntry {
    dn: String,
    attributes: HashMap<String, Attribute>,
}

impl DirectoryEntry {
    /// Creates an empty entry for the given DN.
    #[must_use]
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: HashMap::new(),
        }
    }

    /// The entry's distinguished name as returned by the directory.
    #[must_use]
    pub fn dn(&self) -> &str {
        &self.dn
    }

    /// Returns all values for `attribute`, or `None` if the entry lacks it.
    #[must_use]
    pub fn values(&self, attribute: &str) -> Option<&[String]> {
        self.attributes
            .get(&attribute.to_ascii_lowercase())
            .map(|attr| attr.values())
    }

    /// Returns the first value for `attribute` if present.
    #[must_use]
    pub fn first(&self, attribute: &str) -> Option<&str> {
        self.values(attribute)
            .and_then(|values| values.first().map(String::as_str))
    }

    /// Returns true if the entry carries at least one value for `attribute`.
    #[must_use]
    pub fn has_attribute(&self, attribute: &str) -> bool {
        self.values(attribute).is_some_and(|values| !values.is_empty())
    }

    /// Returns true if `attribute` contains `value`, compared case-insensitively.
    ///
    /// This is the matching rule for type tags such as `objectclass`.
    #[must_use]
    pub fn has_value_ignore_case(&self, attribute: &str, value: &str) -> bool {
        self.values(attribute).is_some_and(|values| {
            values.iter().any(|v| v.eq_ignore_ascii_case(value))
        })
    }

    /// Returns the attribute's values as a set, or `None` if the entry lacks it.
    #[must_use]
    pub fn value_set(&self, attribute: &str) -> Option<HashSet<&str>> {
        self.values(attribute)
            .map(|values| values.iter().map(String::as_str).collect())
    }

    /// Iterates over the attributes in unspecified order.
    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> + '_ {
        self.attributes.values()
    }

    /// Adds values to `attribute`, creating it if absent.
    ///
    /// Returns the values that were already present (and were not re-added).
    pub fn add_values(&mut self, attribute: &str, values: Vec<String>) -> Vec<String> {
        let slot = self
            .attributes
            .entry(attribute.to_ascii_lowercase())
            .or_insert_with(|| Attribute::new(attribute, Vec::new()));
        let mut duplicates = Vec::new();
        for value in values {
            if slot.values.contains(&value) {
                duplicates.push(value);
            } else {
                slot.values.push(value);
            }
        }
        duplicates
    }

    /// Replaces all values of `attribute`; an empty value list removes it.
    pub fn replace_values(&mut self, attribute: &str, values: Vec<String>) {
        let key = attribute.to_ascii_lowercase();
        if values.is_empty() {
            self.attributes.remove(&key);
        } else {
            self.attributes.insert(key, Attribute::new(attribute, values));
        }
    }

    /// Removes specific values of `attribute` (all values when `values` is empty).
    ///
    /// Returns false if the attribute, or any of the named values, was absent.
    pub fn remove_values(&mut self, attribute: &str, values: &[String]) -> bool {
        let key = attribute.to_ascii_lowercase();
        let Some(attr) = self.attributes.get_mut(&key) else {
            return false;
        };
        if values.is_empty() {
            self.attributes.remove(&key);
            return true;
        }
        if values.iter().any(|value| !attr.values.contains(value)) {
            return false;
        }
        attr.values.retain(|existing| !values.contains(existing));
        if attr.values.is_empty() {
            self.attributes.remove(&key);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry() -> DirectoryEntry {
        let mut entry = DirectoryEntry::new("dc=example,dc=com");
        entry.add_values(
            "objectClass",
            vec!["top".to_string(), "domain".to_string()],
        );
        entry.add_values("dc", vec!["example".to_string()]);
        entry
    }

    #[test]
    fn attribute_names_are_case_insensitive() {
        let entry = sample_entry();
        assert!(entry.has_attribute("objectclass"));
        assert!(entry.has_attribute("OBJECTCLASS"));
        assert_eq!(entry.first("DC"), Some("example"));
        assert!(!entry.has_attribute("ou"));
    }

    #[test]
    fn value_match_ignores_case() {
        let entry = sample_entry();
        assert!(entry.has_value_ignore_case("objectclass", "Domain"));
        assert!(!entry.has_value_ignore_case("objectclass", "person"));
    }

    #[test]
    fn value_set_is_order_independent() {
        let entry = sample_entry();
        let expected: HashSet<&str> = ["domain", "top"].into_iter().collect();
        assert_eq!(entry.value_set("objectclass"), Some(expected));
    }

    #[test]
    fn add_values_reports_duplicates() {
        let mut entry = sample_entry();
        let duplicates = entry.add_values(
            "objectclass",
            vec!["top".to_string(), "dcObject".to_string()],
        );
        assert_eq!(duplicates, vec!["top".to_string()]);
        assert!(entry.has_value_ignore_case("objectclass", "dcObject"));
    }

    #[test]
    fn replace_with_empty_removes_attribute() {
        let mut entry = sample_entry();
        entry.replace_values("dc", Vec::new());
        assert!(!entry.has_attribute("dc"));
    }

    #[test]
    fn remove_missing_value_fails() {
        let mut entry = sample_entry();
        assert!(!entry.remove_values("dc", &["other".to_string()]));
        assert!(entry.remove_values("dc", &["example".to_string()]));
        assert!(!entry.has_attribute("dc"));
    }

    #[test]
    fn entries_serialize_with_dn() {
        let entry = sample_entry();
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("dc=example,dc=com"));
    }
}
