//! Contracts for the remote services a feature table talks to.
//!
//! Everything here is implemented by the server side (or by
//! [`crate::memory::MemoryServer`] in tests). A [`Session`] bundles one handle
//! per service and is passed explicitly to every component.

use crate::error::{FeatureStoreError, Result};
use crate::permission::{CallerContext, ObjectDetails};
use crate::table::columns::{ColumnData, ColumnDef, TableData};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub const ORIGINAL_FILE_TYPE: &str = "OriginalFile";
pub const FILE_ANNOTATION_TYPE: &str = "FileAnnotation";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub object_type: String,
    pub id: i64,
}

impl ObjectRef {
    pub fn new(object_type: impl Into<String>, id: i64) -> Self {
        Self {
            object_type: object_type.into(),
            id,
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.id)
    }
}

/// The file backing a remote table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginalFile {
    pub id: i64,
    pub name: String,
    pub path: String,
    pub owner_id: i64,
}

impl OriginalFile {
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(ORIGINAL_FILE_TYPE, self.id)
    }

    pub fn from_object(object: &DomainObject) -> Result<Self> {
        if object.object_type != ORIGINAL_FILE_TYPE {
            return Err(FeatureStoreError::UnsupportedObjectType(
                object.object_type.clone(),
            ));
        }
        let text = |field: &str| match object.fields.get(field) {
            Some(QueryValue::Text(v)) => Ok(v.clone()),
            _ => Err(FeatureStoreError::backend(
                "load file",
                format!("{} has no text field '{field}'", object.object_ref()),
            )),
        };
        Ok(Self {
            id: object.id,
            name: text("name")?,
            path: text("path")?,
            owner_id: object.owner_id,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryValue {
    Int(i64),
    Text(String),
}

impl From<i64> for QueryValue {
    fn from(v: i64) -> Self {
        QueryValue::Int(v)
    }
}

impl From<&str> for QueryValue {
    fn from(v: &str) -> Self {
        QueryValue::Text(v.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(v: String) -> Self {
        QueryValue::Text(v)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Filter {
    Eq(QueryValue),
    In(Vec<QueryValue>),
}

impl Filter {
    pub fn matches(&self, value: Option<&QueryValue>) -> bool {
        match (self, value) {
            (Filter::Eq(expected), Some(v)) => expected == v,
            (Filter::In(options), Some(v)) => options.contains(v),
            (_, None) => false,
        }
    }
}

/// Conjunctive equality/in-list lookup of domain objects of one type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectQuery {
    pub object_type: String,
    pub filters: BTreeMap<String, Filter>,
}

impl ObjectQuery {
    pub fn new(object_type: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            filters: BTreeMap::new(),
        }
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        self.filters.insert(field.into(), Filter::Eq(value.into()));
        self
    }

    pub fn in_list<V: Into<QueryValue>>(
        mut self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.filters.insert(
            field.into(),
            Filter::In(values.into_iter().map(Into::into).collect()),
        );
        self
    }

    pub fn with_filter(mut self, field: impl Into<String>, filter: Filter) -> Self {
        self.filters.insert(field.into(), filter);
        self
    }

    /// Parameterised query text, e.g. `FROM Image WHERE id = :id`.
    pub fn to_query_string(&self) -> String {
        let mut q = format!("FROM {}", self.object_type);
        let conditions: Vec<String> = self
            .filters
            .iter()
            .map(|(field, filter)| {
                let param = field.replace('.', "_");
                match filter {
                    Filter::Eq(_) => format!("{field} = :{param}"),
                    Filter::In(_) => format!("{field} in (:{param})"),
                }
            })
            .collect();
        if !conditions.is_empty() {
            q.push_str(" WHERE ");
            q.push_str(&conditions.join(" AND "));
        }
        q
    }

    pub fn matches(&self, object: &DomainObject) -> bool {
        object.object_type == self.object_type
            && self
                .filters
                .iter()
                .all(|(field, filter)| filter.matches(object.field(field).as_ref()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainObject {
    pub object_type: String,
    pub id: i64,
    pub owner_id: i64,
    #[serde(default)]
    pub fields: BTreeMap<String, QueryValue>,
}

impl DomainObject {
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(self.object_type.clone(), self.id)
    }

    /// Field lookup including the implicit `id` and `details.owner.id`.
    pub fn field(&self, name: &str) -> Option<QueryValue> {
        match name {
            "id" => Some(QueryValue::Int(self.id)),
            "details.owner.id" => Some(QueryValue::Int(self.owner_id)),
            other => self.fields.get(other).cloned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapAnnotation {
    pub id: i64,
    pub namespace: Option<String>,
    pub values: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MapCondition {
    Eq(String),
    In(Vec<String>),
}

impl MapCondition {
    pub fn matches(&self, value: Option<&String>) -> bool {
        match (self, value) {
            (MapCondition::Eq(expected), Some(v)) => expected == v,
            (MapCondition::In(options), Some(v)) => options.contains(v),
            (_, None) => false,
        }
    }
}

pub trait TableHandle: Send {
    fn original_file(&self) -> Result<OriginalFile>;
    fn initialize(&mut self, columns: &[ColumnDef]) -> Result<()>;
    fn headers(&self) -> Result<Vec<ColumnDef>>;
    fn number_of_rows(&self) -> Result<u64>;
    fn add_data(&mut self, columns: &[ColumnData]) -> Result<()>;
    /// Overwrites the rows listed in `data.row_numbers`.
    fn update(&mut self, data: &TableData) -> Result<()>;
    /// Offsets in `[start, stop)` of rows matching `predicate`, ascending.
    fn where_list(&self, predicate: &str, start: u64, stop: u64) -> Result<Vec<u64>>;
    fn read_coordinates(&self, offsets: &[u64]) -> Result<TableData>;
    fn close(&mut self) -> Result<()>;
}

pub trait TableService: Send + Sync {
    fn new_table(&self, path: &str) -> Result<Box<dyn TableHandle>>;
    fn open_table(&self, file: &OriginalFile) -> Result<Box<dyn TableHandle>>;
}

pub trait QueryService: Send + Sync {
    fn find_all(&self, query: &ObjectQuery) -> Result<Vec<DomainObject>>;
    /// Id referenced by `parent_field` on the given object, if any.
    fn parent_id(&self, object_type: &str, id: i64, parent_field: &str) -> Result<Option<i64>>;
}

pub trait AnnotationService: Send + Sync {
    /// Links from `parent` to a file annotation in `namespace` whose file is `file_id`.
    fn find_file_links(&self, parent: &ObjectRef, namespace: &str, file_id: i64)
    -> Result<Vec<ObjectRef>>;
    fn link_file(&self, parent: &ObjectRef, namespace: &str, file_id: i64) -> Result<ObjectRef>;
    /// Every annotation-link type known to the domain model.
    fn link_types(&self) -> Result<Vec<String>>;
    fn links_with_child_file(&self, link_type: &str, file_id: i64) -> Result<Vec<ObjectRef>>;
    fn file_annotations(&self, file_id: i64) -> Result<Vec<ObjectRef>>;
    fn create_map_annotation(
        &self,
        namespace: Option<&str>,
        values: &BTreeMap<String, String>,
    ) -> Result<i64>;
    fn query_map_annotations(
        &self,
        namespace: Option<&str>,
        conditions: &BTreeMap<String, MapCondition>,
    ) -> Result<Vec<MapAnnotation>>;
}

pub trait UpdateService: Send + Sync {
    fn save_file(&self, file: OriginalFile) -> Result<OriginalFile>;
    fn delete_object(&self, object: &ObjectRef) -> Result<()>;
}

pub trait IdentityService: Send + Sync {
    fn current_user(&self) -> Result<CallerContext>;
    fn object_details(&self, object: &ObjectRef) -> Result<ObjectDetails>;
}

/// Handles to the services of one authenticated connection.
#[derive(Clone)]
pub struct Session {
    tables: Arc<dyn TableService>,
    query: Arc<dyn QueryService>,
    annotations: Arc<dyn AnnotationService>,
    update: Arc<dyn UpdateService>,
    identity: Arc<dyn IdentityService>,
}

impl Session {
    pub fn new(
        tables: Arc<dyn TableService>,
        query: Arc<dyn QueryService>,
        annotations: Arc<dyn AnnotationService>,
        update: Arc<dyn UpdateService>,
        identity: Arc<dyn IdentityService>,
    ) -> Self {
        Self {
            tables,
            query,
            annotations,
            update,
            identity,
        }
    }

    pub fn tables(&self) -> &dyn TableService {
        self.tables.as_ref()
    }

    pub fn query(&self) -> &dyn QueryService {
        self.query.as_ref()
    }

    pub fn annotations(&self) -> &dyn AnnotationService {
        self.annotations.as_ref()
    }

    pub fn update(&self) -> &dyn UpdateService {
        self.update.as_ref()
    }

    pub fn identity(&self) -> &dyn IdentityService {
        self.identity.as_ref()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}
