//! Process-local implementation of every remote service.
//!
//! All sessions created from one [`MemoryServer`] share its state, so a table
//! created in one user's session is visible to another's. Table lifecycle
//! calls are recorded in an event log, and a few server faults can be
//! switched on to exercise error paths.

pub mod predicate;

use crate::error::{FeatureStoreError, ResourceType, Result};
use crate::permission::{CallerContext, ObjectDetails, PermissionFlags};
use crate::session::{
    AnnotationService, DomainObject, FILE_ANNOTATION_TYPE, IdentityService, MapAnnotation,
    MapCondition, ORIGINAL_FILE_TYPE, ObjectQuery, ObjectRef, OriginalFile, QueryService,
    QueryValue, Session, TableHandle, TableService, UpdateService,
};
use crate::table::columns::{Cell, ColumnData, ColumnDef, TableData};
use parking_lot::Mutex;
use predicate::Predicate;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Annotation-link types known to the in-memory domain model.
pub const LINK_TYPES: [&str; 4] = [
    "ImageAnnotationLink",
    "RoiAnnotationLink",
    "DatasetAnnotationLink",
    "ProjectAnnotationLink",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableEvent {
    Created(i64),
    Opened(i64),
    Closed(i64),
    Deleted(ObjectRef),
}

/// Server misbehaviour to emulate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Faults {
    /// `initialize` fails on every table.
    pub fail_initialize: bool,
    /// New tables store the full requested path as the file name and leave
    /// the path empty.
    pub ignore_new_table_path: bool,
    /// `headers` returns no columns.
    pub empty_headers: bool,
    /// `close` releases the handle but reports a failure.
    pub fail_close: bool,
}

#[derive(Debug, Default)]
struct StoredTable {
    columns: Vec<ColumnDef>,
    data: Vec<ColumnData>,
}

impl StoredTable {
    fn rows(&self) -> u64 {
        self.data.first().map_or(0, |c| c.len() as u64)
    }
}

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    objects: BTreeMap<ObjectRef, DomainObject>,
    tables: HashMap<i64, StoredTable>,
    owner_permissions: HashMap<ObjectRef, PermissionFlags>,
    others_permissions: PermissionFlags,
    map_annotations: BTreeMap<i64, MapAnnotation>,
    events: Vec<TableEvent>,
    open_handles: usize,
    faults: Faults,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert_object(
        &mut self,
        object_type: &str,
        owner_id: i64,
        fields: BTreeMap<String, QueryValue>,
    ) -> ObjectRef {
        let id = self.next_id();
        let object = DomainObject {
            object_type: object_type.to_string(),
            id,
            owner_id,
            fields,
        };
        let key = object.object_ref();
        self.objects.insert(key.clone(), object);
        key
    }

    fn object(&self, object: &ObjectRef) -> Result<&DomainObject> {
        self.objects.get(object).ok_or_else(|| FeatureStoreError::NotFound {
            resource_type: ResourceType::Object,
            resource_id: object.to_string(),
        })
    }

    fn of_type<'a>(&'a self, object_type: &'a str) -> impl Iterator<Item = &'a DomainObject> + 'a {
        self.objects
            .values()
            .filter(move |o| o.object_type == object_type)
    }

    fn int_field(object: &DomainObject, field: &str) -> Option<i64> {
        match object.fields.get(field) {
            Some(QueryValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    fn text_field<'a>(object: &'a DomainObject, field: &str) -> Option<&'a str> {
        match object.fields.get(field) {
            Some(QueryValue::Text(v)) => Some(v),
            _ => None,
        }
    }

    /// Ids of file annotations in any namespace pointing at `file_id`.
    fn annotations_of_file(&self, file_id: i64) -> Vec<i64> {
        self.of_type(FILE_ANNOTATION_TYPE)
            .filter(|a| State::int_field(a, "file") == Some(file_id))
            .map(|a| a.id)
            .collect()
    }

    fn links_to(&self, link_type: &str, annotation_ids: &[i64]) -> Vec<&DomainObject> {
        self.objects
            .values()
            .filter(|l| {
                l.object_type == link_type
                    && State::int_field(l, "child").is_some_and(|c| annotation_ids.contains(&c))
            })
            .collect()
    }

    fn table(&self, file_id: i64) -> Result<&StoredTable> {
        self.tables
            .get(&file_id)
            .ok_or_else(|| FeatureStoreError::table_not_found(format!("file {file_id}")))
    }

    fn table_mut(&mut self, file_id: i64) -> Result<&mut StoredTable> {
        self.tables
            .get_mut(&file_id)
            .ok_or_else(|| FeatureStoreError::table_not_found(format!("file {file_id}")))
    }
}

/// Shared in-memory server. Cloning yields another handle to the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryServer {
    state: Arc<Mutex<State>>,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A session acting as `user_id` in group 0.
    pub fn session(&self, user_id: i64) -> Session {
        self.session_for(CallerContext::new(user_id))
    }

    pub fn session_for(&self, caller: CallerContext) -> Session {
        let services = Arc::new(MemorySession {
            state: Arc::clone(&self.state),
            caller,
        });
        Session::new(
            services.clone(),
            services.clone(),
            services.clone(),
            services.clone(),
            services,
        )
    }

    pub fn add_image(&self, owner_id: i64) -> i64 {
        self.state
            .lock()
            .insert_object("Image", owner_id, BTreeMap::new())
            .id
    }

    /// Registers a ROI, optionally attached to an image.
    pub fn add_roi(&self, image_id: Option<i64>, owner_id: i64) -> i64 {
        let mut fields = BTreeMap::new();
        if let Some(image_id) = image_id {
            fields.insert("image".to_string(), QueryValue::Int(image_id));
        }
        self.state.lock().insert_object("Roi", owner_id, fields).id
    }

    /// Registers a bare file with no table behind it.
    pub fn add_file(&self, name: &str, path: &str, owner_id: i64) -> i64 {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), QueryValue::from(name));
        fields.insert("path".to_string(), QueryValue::from(path));
        self.state
            .lock()
            .insert_object(ORIGINAL_FILE_TYPE, owner_id, fields)
            .id
    }

    pub fn set_faults(&self, faults: Faults) {
        self.state.lock().faults = faults;
    }

    /// Flags reported to the owner of `object`. Owners get every flag
    /// unless overridden.
    pub fn set_owner_permissions(&self, object: &ObjectRef, flags: PermissionFlags) {
        self.state
            .lock()
            .owner_permissions
            .insert(object.clone(), flags);
    }

    /// Flags reported to non-owners for every object; read-only by default.
    pub fn set_others_permissions(&self, flags: PermissionFlags) {
        self.state.lock().others_permissions = flags;
    }

    pub fn events(&self) -> Vec<TableEvent> {
        self.state.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }

    /// Table handles currently open across all sessions.
    pub fn open_handles(&self) -> usize {
        self.state.lock().open_handles
    }

    pub fn objects_of_type(&self, object_type: &str) -> Vec<DomainObject> {
        self.state.lock().of_type(object_type).cloned().collect()
    }

    pub fn contains(&self, object: &ObjectRef) -> bool {
        self.state.lock().objects.contains_key(object)
    }

    pub fn file(&self, file_id: i64) -> Option<OriginalFile> {
        let state = self.state.lock();
        let object = state
            .objects
            .get(&ObjectRef::new(ORIGINAL_FILE_TYPE, file_id))?;
        OriginalFile::from_object(object).ok()
    }

    pub fn row_count(&self, file_id: i64) -> Option<u64> {
        self.state.lock().tables.get(&file_id).map(StoredTable::rows)
    }
}

/// Services for one caller, sharing the server state.
struct MemorySession {
    state: Arc<Mutex<State>>,
    caller: CallerContext,
}

impl MemorySession {
    fn open_handle(&self, state: &mut State, file_id: i64) -> Box<dyn TableHandle> {
        state.open_handles += 1;
        Box::new(MemoryTable {
            state: Arc::clone(&self.state),
            file_id,
            closed: false,
        })
    }
}

impl TableService for MemorySession {
    fn new_table(&self, path: &str) -> Result<Box<dyn TableHandle>> {
        let mut state = self.state.lock();
        let (dir, name) = if state.faults.ignore_new_table_path {
            ("", path)
        } else {
            path.rsplit_once('/').unwrap_or(("", path))
        };
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), QueryValue::from(name));
        fields.insert("path".to_string(), QueryValue::from(dir));
        let file = state.insert_object(ORIGINAL_FILE_TYPE, self.caller.user_id, fields);
        state.tables.insert(file.id, StoredTable::default());
        state.events.push(TableEvent::Created(file.id));
        debug!(file_id = file.id, path, owner_id = self.caller.user_id, "memory table created");
        Ok(self.open_handle(&mut state, file.id))
    }

    fn open_table(&self, file: &OriginalFile) -> Result<Box<dyn TableHandle>> {
        let mut state = self.state.lock();
        state.object(&file.object_ref())?;
        state.tables.entry(file.id).or_default();
        state.events.push(TableEvent::Opened(file.id));
        debug!(file_id = file.id, "memory table opened");
        Ok(self.open_handle(&mut state, file.id))
    }
}

impl QueryService for MemorySession {
    fn find_all(&self, query: &ObjectQuery) -> Result<Vec<DomainObject>> {
        let state = self.state.lock();
        Ok(state
            .of_type(&query.object_type)
            .filter(|o| query.matches(o))
            .cloned()
            .collect())
    }

    fn parent_id(&self, object_type: &str, id: i64, parent_field: &str) -> Result<Option<i64>> {
        let state = self.state.lock();
        Ok(state
            .objects
            .get(&ObjectRef::new(object_type, id))
            .and_then(|o| State::int_field(o, parent_field)))
    }
}

impl AnnotationService for MemorySession {
    fn find_file_links(
        &self,
        parent: &ObjectRef,
        namespace: &str,
        file_id: i64,
    ) -> Result<Vec<ObjectRef>> {
        let state = self.state.lock();
        let annotations: Vec<i64> = state
            .of_type(FILE_ANNOTATION_TYPE)
            .filter(|a| {
                State::int_field(a, "file") == Some(file_id)
                    && State::text_field(a, "ns") == Some(namespace)
            })
            .map(|a| a.id)
            .collect();
        let link_type = format!("{}AnnotationLink", parent.object_type);
        Ok(state
            .links_to(&link_type, &annotations)
            .into_iter()
            .filter(|l| State::int_field(l, "parent") == Some(parent.id))
            .map(DomainObject::object_ref)
            .collect())
    }

    fn link_file(&self, parent: &ObjectRef, namespace: &str, file_id: i64) -> Result<ObjectRef> {
        let mut state = self.state.lock();
        state.object(parent)?;
        state.object(&ObjectRef::new(ORIGINAL_FILE_TYPE, file_id))?;
        let link_type = format!("{}AnnotationLink", parent.object_type);
        if !LINK_TYPES.contains(&link_type.as_str()) {
            return Err(FeatureStoreError::UnsupportedObjectType(
                parent.object_type.clone(),
            ));
        }
        let owner = self.caller.user_id;
        let mut fields = BTreeMap::new();
        fields.insert("ns".to_string(), QueryValue::from(namespace));
        fields.insert("file".to_string(), QueryValue::Int(file_id));
        let annotation = state.insert_object(FILE_ANNOTATION_TYPE, owner, fields);
        let mut fields = BTreeMap::new();
        fields.insert("parent".to_string(), QueryValue::Int(parent.id));
        fields.insert("child".to_string(), QueryValue::Int(annotation.id));
        Ok(state.insert_object(&link_type, owner, fields))
    }

    fn link_types(&self) -> Result<Vec<String>> {
        Ok(LINK_TYPES.iter().map(ToString::to_string).collect())
    }

    fn links_with_child_file(&self, link_type: &str, file_id: i64) -> Result<Vec<ObjectRef>> {
        let state = self.state.lock();
        let annotations = state.annotations_of_file(file_id);
        Ok(state
            .links_to(link_type, &annotations)
            .into_iter()
            .map(DomainObject::object_ref)
            .collect())
    }

    fn file_annotations(&self, file_id: i64) -> Result<Vec<ObjectRef>> {
        let state = self.state.lock();
        Ok(state
            .annotations_of_file(file_id)
            .into_iter()
            .map(|id| ObjectRef::new(FILE_ANNOTATION_TYPE, id))
            .collect())
    }

    fn create_map_annotation(
        &self,
        namespace: Option<&str>,
        values: &BTreeMap<String, String>,
    ) -> Result<i64> {
        let mut state = self.state.lock();
        let id = state.next_id();
        state.map_annotations.insert(
            id,
            MapAnnotation {
                id,
                namespace: namespace.map(str::to_string),
                values: values.clone(),
            },
        );
        Ok(id)
    }

    fn query_map_annotations(
        &self,
        namespace: Option<&str>,
        conditions: &BTreeMap<String, MapCondition>,
    ) -> Result<Vec<MapAnnotation>> {
        let state = self.state.lock();
        Ok(state
            .map_annotations
            .values()
            .filter(|a| namespace.is_none_or(|ns| a.namespace.as_deref() == Some(ns)))
            .filter(|a| conditions.iter().all(|(k, c)| c.matches(a.values.get(k))))
            .cloned()
            .collect())
    }
}

impl UpdateService for MemorySession {
    fn save_file(&self, file: OriginalFile) -> Result<OriginalFile> {
        let mut state = self.state.lock();
        let key = file.object_ref();
        state.object(&key)?;
        if let Some(object) = state.objects.get_mut(&key) {
            object
                .fields
                .insert("name".to_string(), QueryValue::from(file.name.as_str()));
            object
                .fields
                .insert("path".to_string(), QueryValue::from(file.path.as_str()));
            return OriginalFile::from_object(object);
        }
        Err(FeatureStoreError::backend("save file", format!("{key} vanished")))
    }

    /// Refuses to delete objects still referenced by a link or annotation.
    fn delete_object(&self, object: &ObjectRef) -> Result<()> {
        let mut state = self.state.lock();
        state.object(object)?;
        let referenced = match object.object_type.as_str() {
            ORIGINAL_FILE_TYPE => !state.annotations_of_file(object.id).is_empty(),
            FILE_ANNOTATION_TYPE => LINK_TYPES
                .iter()
                .any(|t| !state.links_to(t, &[object.id]).is_empty()),
            _ => false,
        };
        if referenced {
            return Err(FeatureStoreError::backend(
                "delete",
                format!("{object} is still referenced"),
            ));
        }
        state.objects.remove(object);
        state.owner_permissions.remove(object);
        if object.object_type == ORIGINAL_FILE_TYPE {
            state.tables.remove(&object.id);
        }
        state.events.push(TableEvent::Deleted(object.clone()));
        debug!(%object, "memory object deleted");
        Ok(())
    }
}

impl IdentityService for MemorySession {
    fn current_user(&self) -> Result<CallerContext> {
        Ok(self.caller)
    }

    fn object_details(&self, object: &ObjectRef) -> Result<ObjectDetails> {
        let state = self.state.lock();
        let owner_id = state.object(object)?.owner_id;
        let permissions = if owner_id == self.caller.user_id {
            state
                .owner_permissions
                .get(object)
                .copied()
                .unwrap_or_else(PermissionFlags::all)
        } else {
            state.others_permissions
        };
        Ok(ObjectDetails {
            owner_id,
            group_id: self.caller.group_id,
            permissions,
        })
    }
}

struct MemoryTable {
    state: Arc<Mutex<State>>,
    file_id: i64,
    closed: bool,
}

impl MemoryTable {
    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(FeatureStoreError::backend(
                "table handle",
                format!("handle for file {} is closed", self.file_id),
            ));
        }
        Ok(())
    }
}

fn set_cell(column: &mut ColumnData, row: usize, cell: Cell) -> Result<()> {
    let mismatch = || FeatureStoreError::backend("update", "column type mismatch");
    match (column, cell) {
        (ColumnData::Long(v), Cell::Long(c)) => *v.get_mut(row).ok_or_else(mismatch)? = c,
        (ColumnData::DoubleArray(v), Cell::DoubleArray(c)) => {
            *v.get_mut(row).ok_or_else(mismatch)? = c
        }
        _ => return Err(mismatch()),
    }
    Ok(())
}

/// Checks `data` against the column definitions; returns the row count.
fn check_columns(columns: &[ColumnDef], data: &[ColumnData]) -> Result<usize> {
    if columns.len() != data.len() {
        return Err(FeatureStoreError::backend(
            "add data",
            format!("expected {} columns, received {}", columns.len(), data.len()),
        ));
    }
    let rows = data.first().map_or(0, ColumnData::len);
    for (def, col) in columns.iter().zip(data) {
        if col.len() != rows {
            return Err(FeatureStoreError::backend("add data", "ragged columns"));
        }
        let ok = match col {
            ColumnData::Long(_) => def.is_scalar(),
            ColumnData::DoubleArray(v) => {
                !def.is_scalar() && v.iter().all(|a| a.len() == def.width())
            }
        };
        if !ok {
            return Err(FeatureStoreError::backend(
                "add data",
                format!("data does not fit column {}", def.name),
            ));
        }
    }
    Ok(rows)
}

impl TableHandle for MemoryTable {
    fn original_file(&self) -> Result<OriginalFile> {
        let state = self.state.lock();
        OriginalFile::from_object(state.object(&ObjectRef::new(ORIGINAL_FILE_TYPE, self.file_id))?)
    }

    fn initialize(&mut self, columns: &[ColumnDef]) -> Result<()> {
        self.check_open()?;
        let mut state = self.state.lock();
        if state.faults.fail_initialize {
            return Err(FeatureStoreError::backend("initialize", "server refused columns"));
        }
        let table = state.table_mut(self.file_id)?;
        if !table.columns.is_empty() {
            return Err(FeatureStoreError::backend("initialize", "table already initialized"));
        }
        table.columns = columns.to_vec();
        table.data = columns.iter().map(ColumnData::empty_for).collect();
        Ok(())
    }

    fn headers(&self) -> Result<Vec<ColumnDef>> {
        self.check_open()?;
        let state = self.state.lock();
        if state.faults.empty_headers {
            return Ok(Vec::new());
        }
        Ok(state.table(self.file_id)?.columns.clone())
    }

    fn number_of_rows(&self) -> Result<u64> {
        self.check_open()?;
        Ok(self.state.lock().table(self.file_id)?.rows())
    }

    fn add_data(&mut self, columns: &[ColumnData]) -> Result<()> {
        self.check_open()?;
        let mut state = self.state.lock();
        let table = state.table_mut(self.file_id)?;
        check_columns(&table.columns, columns)?;
        for (acc, col) in table.data.iter_mut().zip(columns) {
            acc.extend(col.clone())?;
        }
        Ok(())
    }

    fn update(&mut self, data: &TableData) -> Result<()> {
        self.check_open()?;
        let mut state = self.state.lock();
        let table = state.table_mut(self.file_id)?;
        let rows = check_columns(&table.columns, &data.columns)?;
        if rows != data.row_numbers.len() {
            return Err(FeatureStoreError::backend(
                "update",
                "row numbers do not match the data",
            ));
        }
        let nrows = table.rows();
        for (i, &row) in data.row_numbers.iter().enumerate() {
            if row >= nrows {
                return Err(FeatureStoreError::backend(
                    "update",
                    format!("row {row} out of range ({nrows} rows)"),
                ));
            }
            for (acc, col) in table.data.iter_mut().zip(&data.columns) {
                let cell = col
                    .cell(i)
                    .ok_or_else(|| FeatureStoreError::backend("update", "short column"))?;
                set_cell(acc, row as usize, cell)?;
            }
        }
        Ok(())
    }

    fn where_list(&self, predicate: &str, start: u64, stop: u64) -> Result<Vec<u64>> {
        self.check_open()?;
        let expr = Predicate::parse(predicate)?;
        let state = self.state.lock();
        let table = state.table(self.file_id)?;
        let stop = stop.min(table.rows());
        let index: HashMap<&str, &[i64]> = table
            .columns
            .iter()
            .zip(&table.data)
            .filter_map(|(def, col)| match col {
                ColumnData::Long(v) => Some((def.name.as_str(), v.as_slice())),
                ColumnData::DoubleArray(_) => None,
            })
            .collect();
        let mut offsets = Vec::new();
        for row in start..stop {
            let lookup = |col: &str| index.get(col).map(|v| v[row as usize] as f64);
            if expr.eval(&lookup)? {
                offsets.push(row);
            }
        }
        Ok(offsets)
    }

    fn read_coordinates(&self, offsets: &[u64]) -> Result<TableData> {
        self.check_open()?;
        let state = self.state.lock();
        let table = state.table(self.file_id)?;
        let mut columns: Vec<ColumnData> = table.columns.iter().map(ColumnData::empty_for).collect();
        for &row in offsets {
            for (out, col) in columns.iter_mut().zip(&table.data) {
                let cell = col.cell(row as usize).ok_or_else(|| {
                    FeatureStoreError::backend(
                        "read coordinates",
                        format!("row {row} out of range ({} rows)", table.rows()),
                    )
                })?;
                out.push(cell)?;
            }
        }
        Ok(TableData {
            row_numbers: offsets.to_vec(),
            columns,
        })
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut state = self.state.lock();
        state.open_handles = state.open_handles.saturating_sub(1);
        state.events.push(TableEvent::Closed(self.file_id));
        debug!(file_id = self.file_id, "memory table closed");
        if state.faults.fail_close {
            return Err(FeatureStoreError::backend(
                "close table",
                format!("close failed for file {}", self.file_id),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Faults, MemoryServer, TableEvent};
    use crate::permission::{CallerContext, PermissionFlags};
    use crate::session::{MapCondition, ObjectQuery, ObjectRef};
    use crate::table::columns::{ColumnData, ColumnDef, ObjectKind, TableData};
    use std::collections::BTreeMap;

    fn columns() -> Vec<ColumnDef> {
        vec![
            ColumnDef::object_id(ObjectKind::Primary),
            ColumnDef::object_id(ObjectKind::Secondary),
            ColumnDef::double_array("a,b", 2),
        ]
    }

    fn row(image: i64, roi: i64, v: f64) -> Vec<ColumnData> {
        vec![
            ColumnData::Long(vec![image]),
            ColumnData::Long(vec![roi]),
            ColumnData::DoubleArray(vec![vec![v, v]]),
        ]
    }

    #[test]
    fn new_table_splits_path_and_records_owner() {
        let server = MemoryServer::new();
        let session = server.session(4);
        let mut table = session.tables().new_table("ns/features/fsA").unwrap();
        let file = table.original_file().unwrap();
        assert_eq!((file.path.as_str(), file.name.as_str()), ("ns/features", "fsA"));
        assert_eq!(file.owner_id, 4);
        table.close().unwrap();
        table.close().unwrap();
        assert_eq!(
            server.events(),
            vec![TableEvent::Created(file.id), TableEvent::Closed(file.id)]
        );
        assert_eq!(server.open_handles(), 0);
    }

    #[test]
    fn path_fault_keeps_full_name() {
        let server = MemoryServer::new();
        server.set_faults(Faults {
            ignore_new_table_path: true,
            ..Faults::default()
        });
        let table = server.session(1).tables().new_table("ns/features/fsA").unwrap();
        let file = table.original_file().unwrap();
        assert_eq!(file.name, "ns/features/fsA");
        assert_eq!(file.path, "");
    }

    #[test]
    fn rows_append_update_and_filter() {
        let server = MemoryServer::new();
        let mut table = server.session(1).tables().new_table("ns/t").unwrap();
        table.initialize(&columns()).unwrap();
        table.add_data(&row(7, -1, 1.0)).unwrap();
        table.add_data(&row(7, 3, 2.0)).unwrap();
        table.add_data(&row(8, -1, 3.0)).unwrap();
        assert_eq!(table.number_of_rows().unwrap(), 3);
        assert_eq!(table.where_list("(ImageID==7)", 0, 3).unwrap(), vec![0, 1]);
        assert_eq!(
            table.where_list("(ImageID==7) & (RoiID==-1)", 0, 3).unwrap(),
            vec![0]
        );
        assert_eq!(table.where_list("(ImageID==7)", 1, 100).unwrap(), vec![1]);

        table
            .update(&TableData {
                row_numbers: vec![0],
                columns: row(7, -1, 9.0),
            })
            .unwrap();
        let data = table.read_coordinates(&[2, 0]).unwrap();
        assert_eq!(data.columns[0], ColumnData::Long(vec![8, 7]));
        assert_eq!(
            data.columns[2],
            ColumnData::DoubleArray(vec![vec![3.0, 3.0], vec![9.0, 9.0]])
        );
        assert!(table.read_coordinates(&[3]).is_err());
        assert!(table.where_list("(Width==1)", 0, 3).is_err());
        assert!(table.add_data(&row(1, 1, 1.0)[..2]).is_err());
    }

    #[test]
    fn closed_handles_refuse_work() {
        let server = MemoryServer::new();
        let mut table = server.session(1).tables().new_table("ns/t").unwrap();
        table.close().unwrap();
        assert!(table.initialize(&columns()).is_err());
        assert!(table.number_of_rows().is_err());
    }

    #[test]
    fn delete_refuses_referenced_objects() {
        let server = MemoryServer::new();
        let session = server.session(1);
        let image = ObjectRef::new("Image", server.add_image(1));
        let file_id = server.add_file("fsA", "ns/features", 1);
        let link = session.annotations().link_file(&image, "ns/source", file_id).unwrap();
        assert_eq!(
            session.annotations().find_file_links(&image, "ns/source", file_id).unwrap(),
            vec![link.clone()]
        );
        assert!(session.annotations().find_file_links(&image, "other", file_id).unwrap().is_empty());

        let file = ObjectRef::new("OriginalFile", file_id);
        let annotations = session.annotations().file_annotations(file_id).unwrap();
        assert_eq!(annotations.len(), 1);
        assert!(session.update().delete_object(&file).is_err());
        assert!(session.update().delete_object(&annotations[0]).is_err());
        session.update().delete_object(&link).unwrap();
        session.update().delete_object(&annotations[0]).unwrap();
        session.update().delete_object(&file).unwrap();
        assert!(!server.contains(&file));
    }

    #[test]
    fn details_report_owner_flags_and_caller_group() {
        let server = MemoryServer::new();
        let image = ObjectRef::new("Image", server.add_image(1));
        let owner = server.session_for(CallerContext::new(1).with_group(3));
        let details = owner.identity().object_details(&image).unwrap();
        assert_eq!((details.owner_id, details.group_id), (1, 3));
        assert_eq!(details.permissions, PermissionFlags::all());

        server.set_owner_permissions(&image, PermissionFlags::read_only());
        let details = owner.identity().object_details(&image).unwrap();
        assert!(!details.permissions.can_edit);
        let other = server.session(2).identity().object_details(&image).unwrap();
        assert_eq!(other.permissions, PermissionFlags::read_only());
        assert!(server.session(2).identity().object_details(&ObjectRef::new("Image", 99)).is_err());
    }

    #[test]
    fn parent_lookup_and_queries() {
        let server = MemoryServer::new();
        let session = server.session(1);
        let image = server.add_image(1);
        let roi = server.add_roi(Some(image), 1);
        let orphan = server.add_roi(None, 1);
        let query = session.query();
        assert_eq!(query.parent_id("Roi", roi, "image").unwrap(), Some(image));
        assert_eq!(query.parent_id("Roi", orphan, "image").unwrap(), None);
        assert_eq!(query.parent_id("Roi", 999, "image").unwrap(), None);
        let found = query.find_all(&ObjectQuery::new("Roi").eq("image", image)).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, roi);
    }

    #[test]
    fn map_annotations_filter_by_namespace_and_value() {
        let server = MemoryServer::new();
        let session = server.session(1);
        let annotations = session.annotations();
        let kv = |v: &str| BTreeMap::from([("k".to_string(), v.to_string())]);
        let a = annotations.create_map_annotation(Some("ns1"), &kv("x")).unwrap();
        annotations.create_map_annotation(Some("ns2"), &kv("x")).unwrap();
        annotations.create_map_annotation(Some("ns1"), &kv("y")).unwrap();
        let cond = BTreeMap::from([("k".to_string(), MapCondition::Eq("x".into()))]);
        let found = annotations.query_map_annotations(Some("ns1"), &cond).unwrap();
        assert_eq!(found.iter().map(|m| m.id).collect::<Vec<_>>(), vec![a]);
        assert_eq!(annotations.query_map_annotations(None, &cond).unwrap().len(), 2);
    }
}
