//! Searchable key/value metadata stored as map annotations.
//!
//! Only strings are stored. [`TypedValue`] encodes bools and numbers as
//! `type:value` strings so they can be recovered on query.

use crate::error::{FeatureStoreError, Result};
use crate::session::{MapAnnotation, MapCondition, Session};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Bool(bool),
    Float(f64),
    Int(i64),
    Str(String),
}

impl TypedValue {
    pub fn to_tagged(&self) -> String {
        match self {
            TypedValue::Bool(v) => format!("bool:{}", if *v { "True" } else { "False" }),
            TypedValue::Float(v) => format!("float:{v:?}"),
            TypedValue::Int(v) => format!("int:{v}"),
            TypedValue::Str(v) => format!("str:{v}"),
        }
    }

    pub fn from_tagged(s: &str) -> Result<Self> {
        let (tag, value) = s
            .split_once(':')
            .ok_or_else(|| FeatureStoreError::usage(format!("untyped value: {s}")))?;
        let bad = |what: &str| FeatureStoreError::usage(format!("invalid {what}: {value}"));
        match tag {
            "bool" => match value {
                "True" => Ok(TypedValue::Bool(true)),
                "False" => Ok(TypedValue::Bool(false)),
                _ => Err(bad("bool")),
            },
            "float" => value.parse().map(TypedValue::Float).map_err(|_| bad("float")),
            "int" | "long" => value.parse().map(TypedValue::Int).map_err(|_| bad("int")),
            "str" => Ok(TypedValue::Str(value.to_string())),
            other => Err(FeatureStoreError::usage(format!("unsupported type: {other}"))),
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_tagged())
    }
}

impl From<bool> for TypedValue {
    fn from(v: bool) -> Self {
        TypedValue::Bool(v)
    }
}

impl From<f64> for TypedValue {
    fn from(v: f64) -> Self {
        TypedValue::Float(v)
    }
}

impl From<i64> for TypedValue {
    fn from(v: i64) -> Self {
        TypedValue::Int(v)
    }
}

impl From<&str> for TypedValue {
    fn from(v: &str) -> Self {
        TypedValue::Str(v.to_string())
    }
}

/// Condition on one typed key.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedCondition {
    Eq(TypedValue),
    In(Vec<TypedValue>),
}

impl TypedCondition {
    fn to_map_condition(&self) -> MapCondition {
        match self {
            TypedCondition::Eq(v) => MapCondition::Eq(v.to_tagged()),
            TypedCondition::In(vs) => MapCondition::In(vs.iter().map(TypedValue::to_tagged).collect()),
        }
    }
}

pub struct MapAnnotations {
    session: Session,
    namespace: Option<String>,
}

impl MapAnnotations {
    pub fn new(session: Session, namespace: Option<String>) -> Self {
        Self { session, namespace }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn create_map_annotation(&self, kvs: &BTreeMap<String, String>) -> Result<i64> {
        let id = self
            .session
            .annotations()
            .create_map_annotation(self.namespace.as_deref(), kvs)?;
        debug!(id, keys = kvs.len(), ns = ?self.namespace, "created map annotation");
        Ok(id)
    }

    /// Annotations in this namespace matching every condition.
    pub fn query_by_map_annotation(
        &self,
        conditions: &BTreeMap<String, MapCondition>,
    ) -> Result<Vec<MapAnnotation>> {
        self.session
            .annotations()
            .query_map_annotations(self.namespace.as_deref(), conditions)
    }

    pub fn create_typed(&self, kvs: &BTreeMap<String, TypedValue>) -> Result<i64> {
        let encoded = kvs
            .iter()
            .map(|(k, v)| (k.clone(), v.to_tagged()))
            .collect();
        self.create_map_annotation(&encoded)
    }

    pub fn query_typed(
        &self,
        conditions: &BTreeMap<String, TypedCondition>,
    ) -> Result<Vec<(i64, BTreeMap<String, TypedValue>)>> {
        let encoded = conditions
            .iter()
            .map(|(k, c)| (k.clone(), c.to_map_condition()))
            .collect();
        self.query_by_map_annotation(&encoded)?
            .into_iter()
            .map(|ann| {
                let values: BTreeMap<String, TypedValue> = ann
                    .values
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), TypedValue::from_tagged(v)?)))
                    .collect::<Result<_>>()?;
                Ok((ann.id, values))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::TypedValue;

    #[test]
    fn tagged_values_decode_to_the_same_type() {
        let cases = [
            (TypedValue::Bool(true), "bool:True"),
            (TypedValue::Int(-3), "int:-3"),
            (TypedValue::Float(2.0), "float:2.0"),
            (TypedValue::Str("a:b".into()), "str:a:b"),
        ];
        for (value, tagged) in cases {
            assert_eq!(value.to_tagged(), tagged);
            assert_eq!(TypedValue::from_tagged(tagged).unwrap(), value);
        }
        assert_eq!(TypedValue::from_tagged("long:7").unwrap(), TypedValue::Int(7));
    }

    #[test]
    fn malformed_tags_are_usage_errors() {
        for bad in ["nocolon", "bool:yes", "int:1.5", "complex:1"] {
            let err = TypedValue::from_tagged(bad).unwrap_err();
            assert_eq!(err.code_str(), "usage", "{bad}");
        }
    }
}
