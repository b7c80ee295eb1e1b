use crate::error::{FeatureStoreError, Result};
use once_cell::sync::OnceCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RowValue {
    Feature(f64),
    Info(i64),
}

/// One sample's feature values plus the identifiers it was stored under.
///
/// Names are shared (`Arc<[String]>`) since every row fetched from a table
/// carries the same header. Name lookups go through an index that is built on
/// first use and covers both the feature and the info namespace; a name may
/// not appear in both.
#[derive(Clone)]
pub struct FeatureRow {
    names: Option<Arc<[String]>>,
    values: Option<Vec<f64>>,
    infonames: Arc<[String]>,
    infovalues: Vec<i64>,
    index: OnceCell<HashMap<String, (usize, bool)>>,
}

#[derive(Debug, Default)]
pub struct FeatureRowBuilder {
    names: Option<Arc<[String]>>,
    values: Option<Vec<f64>>,
    infonames: Option<Arc<[String]>>,
    infovalues: Vec<i64>,
}

impl FeatureRowBuilder {
    pub fn names<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shared_names(names.into_iter().map(Into::into).collect::<Vec<String>>())
    }

    pub fn shared_names(mut self, names: impl Into<Arc<[String]>>) -> Self {
        self.names = Some(names.into());
        self
    }

    pub fn values(mut self, values: Vec<f64>) -> Self {
        self.values = Some(values);
        self
    }

    pub fn info(mut self, infonames: impl Into<Arc<[String]>>, infovalues: Vec<i64>) -> Self {
        self.infonames = Some(infonames.into());
        self.infovalues = infovalues;
        self
    }

    pub fn build(self) -> Result<FeatureRow> {
        let has_names = self.names.as_ref().is_some_and(|n| !n.is_empty());
        let has_values = self.values.as_ref().is_some_and(|v| !v.is_empty());
        if !has_names && !has_values {
            return Err(empty_row());
        }
        if let (Some(names), Some(values)) = (&self.names, &self.values) {
            if names.len() != values.len() {
                return Err(count_mismatch(names.len(), values.len()));
            }
        }
        let infonames = self.infonames.unwrap_or_else(|| Arc::from(Vec::new()));
        if infonames.len() != self.infovalues.len() {
            return Err(FeatureStoreError::row_shape(format!(
                "{} info names but {} info values",
                infonames.len(),
                self.infovalues.len()
            )));
        }
        if let Some(names) = &self.names {
            let features: HashSet<&str> = names.iter().map(String::as_str).collect();
            if let Some(clash) = infonames.iter().find(|n| features.contains(n.as_str())) {
                return Err(FeatureStoreError::row_shape(format!(
                    "'{clash}' is both a feature name and an info name"
                )));
            }
        }
        Ok(FeatureRow {
            names: self.names,
            values: self.values,
            infonames,
            infovalues: self.infovalues,
            index: OnceCell::new(),
        })
    }
}

fn empty_row() -> FeatureStoreError {
    FeatureStoreError::row_shape("at least one of names or values must be provided")
}

fn count_mismatch(expected: usize, received: usize) -> FeatureStoreError {
    FeatureStoreError::row_shape(format!("expected {expected} elements, received {received}"))
}

impl FeatureRow {
    pub fn builder() -> FeatureRowBuilder {
        FeatureRowBuilder::default()
    }

    pub fn new(names: Option<Vec<String>>, values: Option<Vec<f64>>) -> Result<Self> {
        let mut builder = FeatureRow::builder();
        if let Some(names) = names {
            builder = builder.shared_names(names);
        }
        if let Some(values) = values {
            builder = builder.values(values);
        }
        builder.build()
    }

    pub fn names(&self) -> &[String] {
        self.names.as_deref().unwrap_or(&[])
    }

    pub fn values(&self) -> Option<&[f64]> {
        self.values.as_deref()
    }

    pub fn infonames(&self) -> &[String] {
        &self.infonames
    }

    pub fn infovalues(&self) -> &[i64] {
        &self.infovalues
    }

    /// Number of features; fixed for the lifetime of the row.
    pub fn width(&self) -> usize {
        match (&self.names, &self.values) {
            (Some(names), _) if !names.is_empty() => names.len(),
            (_, Some(values)) => values.len(),
            _ => 0,
        }
    }

    /// Position of `name` and whether it lives in the info namespace.
    pub fn get_index(&self, name: &str) -> Result<(usize, bool)> {
        let index = self.index.get_or_init(|| {
            let mut index = HashMap::new();
            for (i, n) in self.names().iter().enumerate() {
                index.entry(n.clone()).or_insert((i, false));
            }
            for (i, n) in self.infonames.iter().enumerate() {
                index.entry(n.clone()).or_insert((i, true));
            }
            index
        });
        index
            .get(name)
            .copied()
            .ok_or_else(|| FeatureStoreError::UnknownName(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Result<RowValue> {
        let (i, info) = self.get_index(name)?;
        if info {
            return Ok(RowValue::Info(self.infovalues[i]));
        }
        let values = self
            .values
            .as_ref()
            .ok_or_else(|| FeatureStoreError::row_shape("row has no values"))?;
        Ok(RowValue::Feature(values[i]))
    }

    pub fn set(&mut self, name: &str, value: RowValue) -> Result<()> {
        let (i, info) = self.get_index(name)?;
        match (info, value) {
            (true, RowValue::Info(v)) => self.infovalues[i] = v,
            (false, RowValue::Feature(v)) => {
                let values = self
                    .values
                    .as_mut()
                    .ok_or_else(|| FeatureStoreError::row_shape("row has no values"))?;
                values[i] = v;
            }
            (true, RowValue::Feature(_)) => {
                return Err(FeatureStoreError::row_shape(format!(
                    "'{name}' is an info column, expected an integer id"
                )));
            }
            (false, RowValue::Info(_)) => {
                return Err(FeatureStoreError::row_shape(format!(
                    "'{name}' is a feature, expected a float"
                )));
            }
        }
        Ok(())
    }

    /// Replaces all feature values, which must match the row width.
    pub fn set_values(&mut self, values: Vec<f64>) -> Result<()> {
        let expected = self.width();
        if expected != 0 && values.len() != expected {
            return Err(count_mismatch(expected, values.len()));
        }
        self.values = Some(values);
        Ok(())
    }

    pub fn features(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().flatten().copied())
    }

    pub fn into_values(self) -> Option<Vec<f64>> {
        self.values
    }
}

impl PartialEq for FeatureRow {
    fn eq(&self, other: &Self) -> bool {
        self.names() == other.names()
            && self.values == other.values
            && self.infonames == other.infonames
            && self.infovalues == other.infovalues
    }
}

impl fmt::Debug for FeatureRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureRow")
            .field("names", &self.names())
            .field("values", &self.values)
            .field("infonames", &self.infonames)
            .field("infovalues", &self.infovalues)
            .finish()
    }
}
