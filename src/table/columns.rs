use crate::error::{FeatureStoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The two kinds of domain object a feature row can be keyed by. Each maps to
/// a fixed identifier column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Primary,
    Secondary,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 2] = [ObjectKind::Primary, ObjectKind::Secondary];

    pub fn column_name(self) -> &'static str {
        match self {
            ObjectKind::Primary => "ImageID",
            ObjectKind::Secondary => "RoiID",
        }
    }

    pub fn object_type(self) -> &'static str {
        match self {
            ObjectKind::Primary => "Image",
            ObjectKind::Secondary => "Roi",
        }
    }

    pub fn link_type(self) -> &'static str {
        match self {
            ObjectKind::Primary => "ImageAnnotationLink",
            ObjectKind::Secondary => "RoiAnnotationLink",
        }
    }

    /// Field on this object that references its primary, if it has one.
    pub fn parent_field(self) -> Option<&'static str> {
        match self {
            ObjectKind::Primary => None,
            ObjectKind::Secondary => Some("image"),
        }
    }

    /// `(Col==id)` predicate for the table engine.
    pub fn predicate(self, id: i64) -> String {
        format!("({}=={})", self.column_name(), id)
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.object_type())
    }
}

impl FromStr for ObjectKind {
    type Err = FeatureStoreError;

    fn from_str(s: &str) -> Result<Self> {
        ObjectKind::ALL
            .into_iter()
            .find(|kind| kind.object_type() == s || kind.column_name() == s)
            .ok_or_else(|| FeatureStoreError::UnsupportedObjectType(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    ObjectId(ObjectKind),
    Long,
    DoubleArray { size: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub kind: ColumnKind,
}

impl ColumnDef {
    pub fn object_id(kind: ObjectKind) -> Self {
        Self {
            name: kind.column_name().to_string(),
            description: String::new(),
            kind: ColumnKind::ObjectId(kind),
        }
    }

    pub fn double_array(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            kind: ColumnKind::DoubleArray { size },
        }
    }

    /// Scalars per row: the declared size for arrays, 1 otherwise.
    pub fn width(&self) -> usize {
        match self.kind {
            ColumnKind::DoubleArray { size } => size,
            ColumnKind::ObjectId(_) | ColumnKind::Long => 1,
        }
    }

    pub fn is_scalar(&self) -> bool {
        !matches!(self.kind, ColumnKind::DoubleArray { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Long(i64),
    DoubleArray(Vec<f64>),
}

impl Cell {
    pub fn as_long(&self) -> Option<i64> {
        match self {
            Cell::Long(v) => Some(*v),
            Cell::DoubleArray(_) => None,
        }
    }
}

/// One row as read from a table, cells in column order.
pub type RawRow = Vec<Cell>;

/// Values of one column for a set of rows.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Long(Vec<i64>),
    DoubleArray(Vec<Vec<f64>>),
}

impl ColumnData {
    pub fn empty_for(def: &ColumnDef) -> Self {
        if def.is_scalar() {
            ColumnData::Long(Vec::new())
        } else {
            ColumnData::DoubleArray(Vec::new())
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Long(v) => v.len(),
            ColumnData::DoubleArray(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cell(&self, i: usize) -> Option<Cell> {
        match self {
            ColumnData::Long(v) => v.get(i).copied().map(Cell::Long),
            ColumnData::DoubleArray(v) => v.get(i).cloned().map(Cell::DoubleArray),
        }
    }

    pub fn push(&mut self, cell: Cell) -> Result<()> {
        match (self, cell) {
            (ColumnData::Long(v), Cell::Long(c)) => v.push(c),
            (ColumnData::DoubleArray(v), Cell::DoubleArray(c)) => v.push(c),
            _ => return Err(type_mismatch("push cell")),
        }
        Ok(())
    }

    pub fn extend(&mut self, other: ColumnData) -> Result<()> {
        match (self, other) {
            (ColumnData::Long(a), ColumnData::Long(b)) => a.extend(b),
            (ColumnData::DoubleArray(a), ColumnData::DoubleArray(b)) => a.extend(b),
            _ => return Err(type_mismatch("extend column")),
        }
        Ok(())
    }

    pub fn into_cells(self) -> Box<dyn Iterator<Item = Cell>> {
        match self {
            ColumnData::Long(v) => Box::new(v.into_iter().map(Cell::Long)),
            ColumnData::DoubleArray(v) => Box::new(v.into_iter().map(Cell::DoubleArray)),
        }
    }
}

fn type_mismatch(operation: &str) -> FeatureStoreError {
    FeatureStoreError::backend(operation, "column type mismatch")
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableData {
    pub row_numbers: Vec<u64>,
    pub columns: Vec<ColumnData>,
}

#[cfg(test)]
mod tests {
    use super::{Cell, ColumnData, ColumnDef, ObjectKind};
    use crate::error::FeatureStoreErrorCode;

    #[test]
    fn object_kind_resolves_from_type_or_column() {
        assert_eq!("Image".parse::<ObjectKind>().unwrap(), ObjectKind::Primary);
        assert_eq!("RoiID".parse::<ObjectKind>().unwrap(), ObjectKind::Secondary);
        let err = "Well".parse::<ObjectKind>().unwrap_err();
        assert_eq!(err.code(), FeatureStoreErrorCode::UnsupportedObjectType);
        assert_eq!(ObjectKind::Secondary.predicate(34), "(RoiID==34)");
    }

    #[test]
    fn widths_count_array_size() {
        assert_eq!(ColumnDef::object_id(ObjectKind::Primary).width(), 1);
        assert_eq!(ColumnDef::double_array("a,b,c", 3).width(), 3);
    }

    #[test]
    fn extend_rejects_mismatched_types() {
        let mut col = ColumnData::Long(vec![1]);
        col.extend(ColumnData::Long(vec![2, 3])).unwrap();
        assert_eq!(col.len(), 3);
        assert!(col.extend(ColumnData::DoubleArray(vec![vec![1.0]])).is_err());
        assert!(col.push(Cell::DoubleArray(vec![])).is_err());
        assert_eq!(col.cell(2), Some(Cell::Long(3)));
    }
}
