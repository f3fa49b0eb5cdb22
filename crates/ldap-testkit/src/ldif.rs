//! LDIF seed-data reading.
//!
//! Supports the subset of LDIF the directory fixture consumes: content
//! records (implicitly `add`), and `add` / `delete` / `modify` change
//! records. Continuation lines are folded, `#` comments are dropped and
//! `::` values are base64-decoded. Records are applied to the store in the
//! order they appear.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::{Error, Result};
use crate::store::{DirectoryStore, Modification};

/// One parsed LDIF record, tagged with the line it started on for error
/// reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LdifRecord {
    /// Add an entry (content records default to this).
    Add {
        dn: String,
        attributes: Vec<(String, String)>,
        line: usize,
    },
    /// Delete an entry.
    Delete { dn: String, line: usize },
    /// Modify an entry's attributes.
    Modify {
        dn: String,
        modifications: Vec<Modification>,
        line: usize,
    },
}

impl LdifRecord {
    pub(crate) fn line(&self) -> usize {
        match self {
            Self::Add { line, .. } | Self::Delete { line, .. } | Self::Modify { line, .. } => *line,
        }
    }
}

/// Parses LDIF text into records.
pub(crate) fn parse(input: &str) -> Result<Vec<LdifRecord>> {
    let mut records = Vec::new();
    for block in blocks(input) {
        let lines = fold(&block)?;
        if lines.is_empty() {
            continue;
        }
        if let Some(record) = parse_record(&lines)? {
            records.push(record);
        }
    }
    Ok(records)
}

/// Applies parsed records to the store, reporting failures against the
/// record's starting line.
pub(crate) fn apply(store: &mut DirectoryStore, records: Vec<LdifRecord>) -> Result<()> {
    for record in records {
        let line = record.line();
        let applied = match record {
            LdifRecord::Add { dn, attributes, .. } => store.add(&dn, grouped(attributes)),
            LdifRecord::Delete { dn, .. } => store.delete(&dn),
            LdifRecord::Modify {
                dn, modifications, ..
            } => store.modify(&dn, &modifications),
        };
        applied.map_err(|err| Error::Ldif {
            line,
            message: err.to_string(),
        })?;
    }
    Ok(())
}

/// Groups repeated `(name, value)` lines into multi-valued attributes,
/// preserving first-seen attribute order.
fn grouped(attributes: Vec<(String, String)>) -> Vec<(String, Vec<String>)> {
    let mut out: Vec<(String, Vec<String>)> = Vec::new();
    for (name, value) in attributes {
        if let Some((_, values)) = out
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            values.push(value);
        } else {
            out.push((name, vec![value]));
        }
    }
    out
}

/// Splits raw input into blank-line separated blocks of `(line, text)` pairs.
fn blocks(input: &str) -> Vec<Vec<(usize, String)>> {
    let mut blocks = Vec::new();
    let mut current: Vec<(usize, String)> = Vec::new();
    for (idx, raw) in input.lines().enumerate() {
        if raw.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        } else {
            current.push((idx + 1, raw.to_string()));
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

/// Folds continuation lines (leading space) and drops comments and the
/// optional `version:` header.
fn fold(block: &[(usize, String)]) -> Result<Vec<(usize, String)>> {
    let mut lines: Vec<(usize, String)> = Vec::new();
    let mut dropped_comment = false;
    for (line, raw) in block {
        if let Some(continuation) = raw.strip_prefix(' ') {
            if dropped_comment {
                continue;
            }
            match lines.last_mut() {
                Some((_, text)) => text.push_str(continuation),
                None => {
                    return Err(Error::Ldif {
                        line: *line,
                        message: "continuation line with nothing to continue".to_string(),
                    })
                }
            }
            continue;
        }
        if raw.starts_with('#') {
            dropped_comment = true;
            continue;
        }
        dropped_comment = false;
        lines.push((*line, raw.clone()));
    }
    if let Some((_, first)) = lines.first() {
        if first.to_ascii_lowercase().starts_with("version:") {
            lines.remove(0);
        }
    }
    Ok(lines)
}

/// Splits one logical line into an attribute name and decoded value.
fn split_line(line: usize, text: &str) -> Result<(String, String)> {
    let colon = text.find(':').ok_or_else(|| Error::Ldif {
        line,
        message: format!("expected `name: value`, got `{text}`"),
    })?;
    let name = text[..colon].trim().to_string();
    if name.is_empty() {
        return Err(Error::Ldif {
            line,
            message: "attribute name cannot be empty".to_string(),
        });
    }
    let rest = &text[colon + 1..];
    if let Some(encoded) = rest.strip_prefix(':') {
        let bytes = BASE64.decode(encoded.trim()).map_err(|err| Error::Ldif {
            line,
            message: format!("invalid base64 value for {name}: {err}"),
        })?;
        let value = String::from_utf8(bytes).map_err(|err| Error::Ldif {
            line,
            message: format!("base64 value for {name} is not valid UTF-8: {err}"),
        })?;
        return Ok((name, value));
    }
    if rest.starts_with('<') {
        return Err(Error::Ldif {
            line,
            message: format!("URL-valued attribute {name} is not supported"),
        });
    }
    Ok((name, rest.trim_start().trim_end().to_string()))
}

fn parse_record(lines: &[(usize, String)]) -> Result<Option<LdifRecord>> {
    let Some((first_line, first_text)) = lines.first() else {
        return Ok(None);
    };
    let (name, dn) = split_line(*first_line, first_text)?;
    if !name.eq_ignore_ascii_case("dn") {
        return Err(Error::Ldif {
            line: *first_line,
            message: format!("record must start with `dn:`, got `{name}:`"),
        });
    }

    let body = &lines[1..];
    let changetype = body
        .first()
        .map(|(line, text)| split_line(*line, text))
        .transpose()?
        .filter(|(name, _)| name.eq_ignore_ascii_case("changetype"));

    let Some((_, changetype)) = changetype else {
        // Content record: every remaining line is an attribute value.
        let attributes = body
            .iter()
            .map(|(line, text)| split_line(*line, text))
            .collect::<Result<Vec<_>>>()?;
        return Ok(Some(LdifRecord::Add {
            dn,
            attributes,
            line: *first_line,
        }));
    };

    let body = &body[1..];
    match changetype.to_ascii_lowercase().as_str() {
        "add" => {
            let attributes = body
                .iter()
                .map(|(line, text)| split_line(*line, text))
                .collect::<Result<Vec<_>>>()?;
            Ok(Some(LdifRecord::Add {
                dn,
                attributes,
                line: *first_line,
            }))
        }
        "delete" => {
            if let Some((line, text)) = body.first() {
                return Err(Error::Ldif {
                    line: *line,
                    message: format!("unexpected content after delete record: `{text}`"),
                });
            }
            Ok(Some(LdifRecord::Delete {
                dn,
                line: *first_line,
            }))
        }
        "modify" => {
            let modifications = parse_modifications(body)?;
            Ok(Some(LdifRecord::Modify {
                dn,
                modifications,
                line: *first_line,
            }))
        }
        other => Err(Error::Ldif {
            line: *first_line,
            message: format!("unsupported changetype `{other}`"),
        }),
    }
}

fn parse_modifications(body: &[(usize, String)]) -> Result<Vec<Modification>> {
    let mut modifications = Vec::new();
    let mut cursor = 0;
    while cursor < body.len() {
        let (line, text) = &body[cursor];
        if text == "-" {
            cursor += 1;
            continue;
        }
        let (operation, attribute) = split_line(*line, text)?;
        cursor += 1;

        let mut values = Vec::new();
        while cursor < body.len() && body[cursor].1 != "-" {
            let (value_line, value_text) = &body[cursor];
            let (name, value) = split_line(*value_line, value_text)?;
            if !name.eq_ignore_ascii_case(&attribute) {
                return Err(Error::Ldif {
                    line: *value_line,
                    message: format!(
                        "modify value for `{name}` inside a change targeting `{attribute}`"
                    ),
                });
            }
            values.push(value);
            cursor += 1;
        }

        let modification = match operation.to_ascii_lowercase().as_str() {
            "add" => Modification::Add { attribute, values },
            "delete" => Modification::Delete { attribute, values },
            "replace" => Modification::Replace { attribute, values },
            other => {
                return Err(Error::Ldif {
                    line: *line,
                    message: format!("unsupported modify operation `{other}`"),
                })
            }
        };
        modifications.push(modification);
    }
    Ok(modifications)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_content_records() {
        let records = parse(
            "version: 1\n\
             dn: dc=example,dc=com\n\
             objectclass: top\n\
             objectclass: domain\n\
             dc: example\n\
             \n\
             dn: ou=People,dc=example,dc=com\n\
             objectclass: organizationalUnit\n\
             ou: People\n",
        )
        .unwrap();

        assert_eq!(records.len(), 2);
        let LdifRecord::Add { dn, attributes, .. } = &records[0] else {
            panic!("expected add record");
        };
        assert_eq!(dn, "dc=example,dc=com");
        assert_eq!(attributes.len(), 3);
    }

    #[test]
    fn folds_continuation_lines() {
        let records = parse(
            "dn: ou=People,dc=exam\n \
             ple,dc=com\n\
             objectclass: organizationalUnit\n\
             description: spans\n  two lines\n",
        )
        .unwrap();
        let LdifRecord::Add { dn, attributes, .. } = &records[0] else {
            panic!("expected add record");
        };
        assert_eq!(dn, "ou=People,dc=example,dc=com");
        assert!(attributes
            .iter()
            .any(|(name, value)| name == "description" && value == "spans two lines"));
    }

    #[test]
    fn decodes_base64_values() {
        let records = parse("dn: dc=example,dc=com\ndescription:: aGVsbG8=\n").unwrap();
        let LdifRecord::Add { attributes, .. } = &records[0] else {
            panic!("expected add record");
        };
        assert_eq!(attributes[0], ("description".to_string(), "hello".to_string()));
    }

    #[test]
    fn skips_comments() {
        let records = parse(
            "# seed data\n\
             dn: dc=example,dc=com\n\
             # folded comment\n  continues here\n\
             dc: example\n",
        )
        .unwrap();
        let LdifRecord::Add { attributes, .. } = &records[0] else {
            panic!("expected add record");
        };
        assert_eq!(attributes, &[("dc".to_string(), "example".to_string())]);
    }

    #[test]
    fn parses_change_records() {
        let records = parse(
            "dn: ou=Sales,dc=example,dc=com\n\
             changetype: add\n\
             objectclass: organizationalUnit\n\
             ou: Sales\n\
             \n\
             dn: ou=Sales,dc=example,dc=com\n\
             changetype: modify\n\
             add: description\n\
             description: west region\n\
             -\n\
             replace: ou\n\
             ou: Sales\n\
             -\n\
             \n\
             dn: ou=Sales,dc=example,dc=com\n\
             changetype: delete\n",
        )
        .unwrap();

        assert_eq!(records.len(), 3);
        let LdifRecord::Modify { modifications, .. } = &records[1] else {
            panic!("expected modify record");
        };
        assert_eq!(
            modifications[0],
            Modification::Add {
                attribute: "description".to_string(),
                values: vec!["west region".to_string()],
            }
        );
        assert!(matches!(records[2], LdifRecord::Delete { .. }));
    }

    #[test]
    fn rejects_records_without_dn() {
        let err = parse("objectclass: top\n").unwrap_err();
        assert!(matches!(err, Error::Ldif { line: 1, .. }));
    }

    #[test]
    fn rejects_unsupported_changetype() {
        let err = parse("dn: dc=example,dc=com\nchangetype: moddn\n").unwrap_err();
        assert!(err.to_string().contains("moddn"));
    }

    #[test]
    fn rejects_garbage_lines() {
        let err = parse("dn: dc=example,dc=com\nthis is not ldif\n").unwrap_err();
        assert!(matches!(err, Error::Ldif { line: 2, .. }));
    }
}
