//! Feature-name validation and the delimited encoding used for the combined
//! value column.
//!
//! The table engine has no per-element naming for array columns, so the names
//! of all features are packed into the single column name, joined by `,`.
//! `\` escapes itself and the delimiter so arbitrary names survive a round trip.

use crate::error::{FeatureStoreError, Result};
use std::collections::BTreeMap;

pub const NAME_DELIMITER: char = ',';
pub const KV_DELIMITER: char = '=';
const ESCAPE: char = '\\';
const ALLOWED_PUNCTUATION: &str = "_-.:()[]{}, ";

pub fn validate_feature_name(name: &str) -> Result<()> {
    let invalid = |reason: String| {
        Err(FeatureStoreError::InvalidFeatureName {
            name: name.to_string(),
            reason,
        })
    };
    let Some(first) = name.chars().next() else {
        return invalid("name is empty".into());
    };
    if !first.is_ascii_alphanumeric() {
        return invalid("must start with a letter or digit".into());
    }
    if let Some(c) = name
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && !ALLOWED_PUNCTUATION.contains(*c))
    {
        return invalid(format!("character {c:?} is not allowed"));
    }
    Ok(())
}

fn escape_into(out: &mut String, s: &str, specials: &[char]) {
    for c in s.chars() {
        if c == ESCAPE || specials.contains(&c) {
            out.push(ESCAPE);
        }
        out.push(c);
    }
}

/// Splits on unescaped `delimiter`, removing one level of escaping.
fn split_unescaped(s: &str, delimiter: char) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        match c {
            ESCAPE => match chars.next() {
                Some(escaped) => current.push(escaped),
                None => {
                    return Err(FeatureStoreError::backend(
                        "parse column names",
                        format!("dangling escape in {s:?}"),
                    ));
                }
            },
            c if c == delimiter => tokens.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    tokens.push(current);
    Ok(tokens)
}

pub fn format_names<S: AsRef<str>>(names: &[S]) -> String {
    let mut out = String::new();
    for (i, name) in names.iter().enumerate() {
        if i > 0 {
            out.push(NAME_DELIMITER);
        }
        escape_into(&mut out, name.as_ref(), &[NAME_DELIMITER]);
    }
    out
}

pub fn parse_names(encoded: &str) -> Result<Vec<String>> {
    if encoded.is_empty() {
        return Ok(Vec::new());
    }
    split_unescaped(encoded, NAME_DELIMITER)
}

/// Packs a description map into one string as `k=v,k=v`, keys sorted.
pub fn format_key_values(desc: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (i, (k, v)) in desc.iter().enumerate() {
        if i > 0 {
            out.push(NAME_DELIMITER);
        }
        escape_into(&mut out, k, &[NAME_DELIMITER, KV_DELIMITER]);
        out.push(KV_DELIMITER);
        escape_into(&mut out, v, &[NAME_DELIMITER, KV_DELIMITER]);
    }
    out
}

pub fn parse_key_values(encoded: &str) -> Result<BTreeMap<String, String>> {
    let mut desc = BTreeMap::new();
    if encoded.is_empty() {
        return Ok(desc);
    }
    // Split on the outer delimiter keeping escapes, then split each pair.
    for pair in split_keep_escapes(encoded, NAME_DELIMITER) {
        let parts = split_unescaped(&pair, KV_DELIMITER)?;
        let [k, v]: [String; 2] = parts.try_into().map_err(|parts: Vec<String>| {
            FeatureStoreError::backend(
                "parse description",
                format!("expected key=value, got {} parts in {pair:?}", parts.len()),
            )
        })?;
        desc.insert(k, v);
    }
    Ok(desc)
}

fn split_keep_escapes(s: &str, delimiter: char) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == ESCAPE {
            current.push(c);
            if let Some(next) = chars.next() {
                current.push(next);
            }
        } else if c == delimiter {
            tokens.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    tokens.push(current);
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FeatureStoreErrorCode;
    use proptest::prelude::*;

    #[test]
    fn accepts_typical_names() {
        for name in ["x1", "Area", "mean (ch 1)", "haralick[0].contrast", "9a_b-c:d"] {
            validate_feature_name(name).unwrap_or_else(|e| panic!("{name}: {e}"));
        }
    }

    #[test]
    fn rejects_bad_names() {
        for name in ["", "_x", " x", "a<b", "a>b", "a/b", "a\\b", "é"] {
            let err = validate_feature_name(name).unwrap_err();
            assert_eq!(err.code(), FeatureStoreErrorCode::InvalidFeatureName, "{name}");
        }
    }

    #[test]
    fn names_with_delimiter_are_escaped() {
        let names = vec!["a,b".to_string(), "c\\d".to_string(), "e".to_string()];
        let encoded = format_names(&names);
        assert_eq!(encoded, "a\\,b,c\\\\d,e");
        assert_eq!(parse_names(&encoded).unwrap(), names);
        assert_eq!(parse_names("").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn dangling_escape_is_an_error() {
        assert!(parse_names("abc\\").is_err());
    }

    #[test]
    fn key_values_round_trip_with_specials() {
        let mut desc = BTreeMap::new();
        desc.insert("fs=name".to_string(), "a,b".to_string());
        desc.insert("kind".to_string(), "x\\y".to_string());
        let encoded = format_key_values(&desc);
        assert_eq!(parse_key_values(&encoded).unwrap(), desc);
        assert!(parse_key_values("novalue").is_err());
    }

    proptest! {
        #[test]
        fn format_parse_reversible(names in prop::collection::vec("[a-z,\\\\ ]{1,8}", 1..8)) {
            let encoded = format_names(&names);
            prop_assert_eq!(parse_names(&encoded).unwrap(), names);
        }
    }
}
