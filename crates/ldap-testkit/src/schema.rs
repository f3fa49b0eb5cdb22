//! Directory schema registry.
//!
//! The server validates added entries against a schema when one is
//! configured: every object class and attribute type must be defined.
//! Definitions come from the built-in standard schema (selected by the
//! reserved source name `default`) and/or LDIF schema sources, merged in
//! order with the last definition of a name winning.

use std::collections::HashMap;
use std::fs;

use crate::config::SchemaSource;
use crate::error::{Error, Result};
use crate::ldif::{self, LdifRecord};

/// Well-known object classes available without a custom schema.
const STANDARD_OBJECT_CLASSES: &[&str] = &[
    "top",
    "alias",
    "country",
    "locality",
    "organization",
    "organizationalUnit",
    "person",
    "organizationalPerson",
    "organizationalRole",
    "inetOrgPerson",
    "residentialPerson",
    "groupOfNames",
    "groupOfUniqueNames",
    "dcObject",
    "domain",
    "device",
    "applicationProcess",
    "uidObject",
    "extensibleObject",
];

/// Well-known attribute types (primary names and their aliases) available
/// without a custom schema.
const STANDARD_ATTRIBUTE_TYPES: &[&str] = &[
    "objectClass",
    "aliasedObjectName",
    "cn",
    "commonName",
    "sn",
    "surname",
    "serialNumber",
    "c",
    "countryName",
    "l",
    "localityName",
    "st",
    "stateOrProvinceName",
    "street",
    "streetAddress",
    "o",
    "organizationName",
    "ou",
    "organizationalUnitName",
    "title",
    "description",
    "searchGuide",
    "businessCategory",
    "postalAddress",
    "postalCode",
    "postOfficeBox",
    "physicalDeliveryOfficeName",
    "telephoneNumber",
    "facsimileTelephoneNumber",
    "seeAlso",
    "userPassword",
    "member",
    "uniqueMember",
    "owner",
    "roleOccupant",
    "givenName",
    "initials",
    "distinguishedName",
    "uid",
    "userid",
    "mail",
    "rfc822Mailbox",
    "dc",
    "domainComponent",
    "associatedDomain",
    "displayName",
    "employeeNumber",
    "employeeType",
    "departmentNumber",
    "jpegPhoto",
    "labeledURI",
    "preferredLanguage",
    "mobile",
    "pager",
    "carLicense",
    "homePhone",
    "homePostalAddress",
    "manager",
    "secretary",
    // Operational attributes the store maintains.
    "createTimestamp",
    "modifyTimestamp",
    "entryUUID",
    "creatorsName",
    "modifiersName",
];

/// A named schema definition (attribute type or object class).
#[derive(Debug, Clone, PartialEq, Eq)]
struct Definition {
    oid: String,
    names: Vec<String>,
}

/// A merged directory schema.
#[derive(Debug, Clone, Default)]
pub(crate) struct Schema {
    attribute_types: HashMap<String, Definition>,
    object_classes: HashMap<String, Definition>,
}

impl Schema {
    /// The built-in standard schema.
    pub(crate) fn standard() -> Self {
        let mut schema = Self::default();
        for name in STANDARD_ATTRIBUTE_TYPES {
            schema.define_attribute_type(Definition {
                oid: String::new(),
                names: vec![(*name).to_string()],
            });
        }
        for name in STANDARD_OBJECT_CLASSES {
            schema.define_object_class(Definition {
                oid: String::new(),
                names: vec![(*name).to_string()],
            });
        }
        schema
    }

    /// Builds the merged schema for the configured sources, or `None` when no
    /// sources are configured (schema checking disabled).
    pub(crate) fn from_sources(sources: &[SchemaSource]) -> Result<Option<Self>> {
        if sources.is_empty() {
            return Ok(None);
        }
        let mut merged = Self::default();
        for source in sources {
            let schema = match source {
                SchemaSource::Standard => Self::standard(),
                SchemaSource::Path(path) => {
                    let text = fs::read_to_string(path).map_err(|err| {
                        Error::Schema(format!(
                            "could not read schema source {}: {err}",
                            path.display()
                        ))
                    })?;
                    Self::parse(&text)?
                }
                SchemaSource::Inline(text) => Self::parse(text)?,
            };
            merged.merge(schema);
        }
        Ok(Some(merged))
    }

    /// Parses schema definitions from LDIF text: `attributeTypes` and
    /// `objectClasses` values of any record are read, everything else is
    /// ignored.
    pub(crate) fn parse(text: &str) -> Result<Self> {
        let records =
            ldif::parse(text).map_err(|err| Error::Schema(format!("invalid schema LDIF: {err}")))?;
        let mut schema = Self::default();
        for record in records {
            let LdifRecord::Add { attributes, .. } = record else {
                continue;
            };
            for (name, value) in attributes {
                if name.eq_ignore_ascii_case("attributetypes") {
                    schema.define_attribute_type(parse_definition(&value)?);
                } else if name.eq_ignore_ascii_case("objectclasses") {
                    schema.define_object_class(parse_definition(&value)?);
                }
            }
        }
        Ok(schema)
    }

    /// Merges `other` into `self`; definitions in `other` win on name clash.
    pub(crate) fn merge(&mut self, other: Self) {
        self.attribute_types.extend(other.attribute_types);
        self.object_classes.extend(other.object_classes);
    }

    /// Returns true if the object class name is defined.
    pub(crate) fn has_object_class(&self, name: &str) -> bool {
        self.object_classes.contains_key(&name.to_ascii_lowercase())
    }

    /// Returns true if the attribute type name is defined.
    pub(crate) fn has_attribute_type(&self, name: &str) -> bool {
        self.attribute_types.contains_key(&name.to_ascii_lowercase())
    }

    /// Name-level entry check: every object class and attribute type used by
    /// the entry must be defined.
    pub(crate) fn check_entry<'a>(
        &self,
        object_classes: impl Iterator<Item = &'a str>,
        attributes: impl Iterator<Item = &'a str>,
    ) -> std::result::Result<(), String> {
        for object_class in object_classes {
            if !self.has_object_class(object_class) {
                return Err(format!("object class {object_class} is not defined"));
            }
        }
        for attribute in attributes {
            if !self.has_attribute_type(attribute) {
                return Err(format!("attribute type {attribute} is not defined"));
            }
        }
        Ok(())
    }

    fn define_attribute_type(&mut self, definition: Definition) {
        for name in &definition.names {
            self.attribute_types
                .insert(name.to_ascii_lowercase(), definition.clone());
        }
    }

    fn define_object_class(&mut self, definition: Definition) {
        for name in &definition.names {
            self.object_classes
                .insert(name.to_ascii_lowercase(), definition.clone());
        }
    }
}

/// Parses one `( oid NAME 'x' ... )` definition value, collecting the OID and
/// all names. Everything after the names (syntax, matching rules, SUP) is
/// irrelevant to name-level checking and skipped.
fn parse_definition(value: &str) -> Result<Definition> {
    let inner = value
        .trim()
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| Error::Schema(format!("definition must be parenthesized: {value}")))?
        .trim();

    let oid = inner
        .split_whitespace()
        .next()
        .ok_or_else(|| Error::Schema(format!("definition has no OID: {value}")))?
        .to_string();

    let mut names = Vec::new();
    if let Some(after) = find_keyword(inner, "NAME") {
        let after = after.trim_start();
        if let Some(rest) = after.strip_prefix('(') {
            let list = rest
                .split(')')
                .next()
                .ok_or_else(|| Error::Schema(format!("unterminated NAME list: {value}")))?;
            names.extend(quoted_strings(list));
        } else {
            names.extend(quoted_strings(after).into_iter().take(1));
        }
    }
    if names.is_empty() {
        return Err(Error::Schema(format!("definition has no NAME: {value}")));
    }

    Ok(Definition { oid, names })
}

/// Finds `keyword` as a standalone token and returns the text after it.
fn find_keyword<'a>(input: &'a str, keyword: &str) -> Option<&'a str> {
    let mut offset = 0;
    while let Some(pos) = input[offset..].find(keyword) {
        let start = offset + pos;
        let end = start + keyword.len();
        let before_ok = start == 0 || input[..start].ends_with(char::is_whitespace);
        let after_ok = input[end..]
            .chars()
            .next()
            .map_or(true, char::is_whitespace);
        if before_ok && after_ok {
            return Some(&input[end..]);
        }
        offset = end;
    }
    None
}

/// Extracts `'quoted'` strings in order.
fn quoted_strings(input: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = input;
    while let Some(open) = rest.find('\'') {
        let after = &rest[open + 1..];
        let Some(close) = after.find('\'') else {
            break;
        };
        out.push(after[..close].to_string());
        rest = &after[close + 1..];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const CUSTOM_SCHEMA: &str = "\
dn: cn=schema
attributeTypes: ( 1.3.6.1.4.1.99999.1.1 NAME 'shoeSize' SYNTAX 1.3.6.1.4.1.1466.115.121.1.27 SINGLE-VALUE )
objectClasses: ( 1.3.6.1.4.1.99999.2.1 NAME 'sneakerhead' SUP top STRUCTURAL MAY ( shoeSize ) )
";

    #[test]
    fn standard_schema_knows_common_definitions() {
        let schema = Schema::standard();
        assert!(schema.has_object_class("domain"));
        assert!(schema.has_object_class("ORGANIZATIONALUNIT"));
        assert!(schema.has_attribute_type("ou"));
        assert!(schema.has_attribute_type("objectClass"));
        assert!(schema.has_attribute_type("entryUUID"));
        assert!(!schema.has_object_class("sneakerhead"));
    }

    #[test]
    fn parses_custom_schema_ldif() {
        let schema = Schema::parse(CUSTOM_SCHEMA).unwrap();
        assert!(schema.has_attribute_type("shoeSize"));
        assert!(schema.has_object_class("sneakerhead"));
        assert!(!schema.has_object_class("domain"));
    }

    #[test]
    fn parses_multiple_names() {
        let schema = Schema::parse(
            "dn: cn=schema\n\
             attributeTypes: ( 0.9.2342.19200300.100.1.25 NAME ( 'dc' 'domainComponent' ) )\n",
        )
        .unwrap();
        assert!(schema.has_attribute_type("dc"));
        assert!(schema.has_attribute_type("DOMAINCOMPONENT"));
    }

    #[test]
    fn merge_combines_sources() {
        let sources = [
            SchemaSource::Standard,
            SchemaSource::Inline(CUSTOM_SCHEMA.to_string()),
        ];
        let schema = Schema::from_sources(&sources).unwrap().unwrap();
        assert!(schema.has_object_class("domain"));
        assert!(schema.has_object_class("sneakerhead"));

        assert!(Schema::from_sources(&[]).unwrap().is_none());
    }

    #[test]
    fn entry_check_names_the_offender() {
        let schema = Schema::standard();
        let err = schema
            .check_entry(["flyingSaucer"].into_iter(), ["ou"].into_iter())
            .unwrap_err();
        assert!(err.contains("flyingSaucer"));

        schema
            .check_entry(
                ["domain", "top"].into_iter(),
                ["objectclass", "dc"].into_iter(),
            )
            .unwrap();
    }

    #[test]
    fn rejects_malformed_definitions() {
        let err = Schema::parse("dn: cn=schema\nattributeTypes: no parens here\n").unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }
}
