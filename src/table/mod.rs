pub mod chunked;
pub mod columns;

use crate::cache::Closable;
use crate::config::FeatureStoreConfig;
use crate::error::{FeatureStoreError, ResourceType, Result};
use crate::names::{
    format_key_values, format_names, parse_key_values, parse_names, validate_feature_name,
};
use crate::permission::PermissionOracle;
use crate::row::FeatureRow;
use crate::session::{
    DomainObject, Filter, ORIGINAL_FILE_TYPE, ObjectQuery, ObjectRef, OriginalFile, Session,
    TableHandle,
};
use chunked::{chunk_size_for, chunked_read, columns_to_rows};
use columns::{Cell, ColumnData, ColumnDef, ObjectKind, RawRow, TableData};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Identifier pair a row is stored under; the unused slot holds the sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowKey {
    pub primary: i64,
    pub secondary: i64,
}

impl RowKey {
    pub fn id(&self, kind: ObjectKind) -> i64 {
        match kind {
            ObjectKind::Primary => self.primary,
            ObjectKind::Secondary => self.secondary,
        }
    }

    fn predicate(&self) -> String {
        format!(
            "{} & {}",
            ObjectKind::Primary.predicate(self.primary),
            ObjectKind::Secondary.predicate(self.secondary)
        )
    }
}

/// One named feature set backed by one remote table.
///
/// Column layout: `ImageID`, `RoiID`, then a single double-array column whose
/// name is the escaped, comma-joined list of feature names.
pub struct FeatureTable {
    session: Session,
    config: FeatureStoreConfig,
    name: String,
    owner_id: Option<i64>,
    table: Option<Box<dyn TableHandle>>,
    file: Option<OriginalFile>,
    cols: Option<Vec<ColumnDef>>,
    feature_names: Option<Arc<[String]>>,
    chunk_size: Option<usize>,
}

impl FeatureTable {
    /// An unopened table; call [`FeatureTable::get_or_create`] before use.
    pub fn new(session: Session, config: &FeatureStoreConfig, name: impl Into<String>) -> Self {
        Self {
            session,
            config: config.clone(),
            name: name.into(),
            owner_id: None,
            table: None,
            file: None,
            cols: None,
            feature_names: None,
            chunk_size: None,
        }
    }

    /// Opens the existing table `name` owned by `owner_id` (default: caller).
    pub fn open(
        session: Session,
        config: &FeatureStoreConfig,
        name: impl Into<String>,
        owner_id: Option<i64>,
    ) -> Result<Self> {
        let mut table = Self::new(session, config, name);
        let owner_id = match owner_id {
            Some(id) => id,
            None => table.session.identity().current_user()?.user_id,
        };
        table.get_or_create(owner_id, None::<&[&str]>)?;
        Ok(table)
    }

    /// Creates a new table `name` owned by the caller.
    pub fn create<S: AsRef<str>>(
        session: Session,
        config: &FeatureStoreConfig,
        name: impl Into<String>,
        column_names: &[S],
    ) -> Result<Self> {
        let mut table = Self::new(session, config, name);
        let owner_id = table.session.identity().current_user()?.user_id;
        table.get_or_create(owner_id, Some(column_names))?;
        Ok(table)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner_id(&self) -> Option<i64> {
        self.owner_id
    }

    pub fn table_path(&self) -> String {
        format!("{}/{}", self.config.ft_space, self.name)
    }

    pub fn is_open(&self) -> bool {
        self.table.is_some()
    }

    pub fn file(&self) -> Option<&OriginalFile> {
        self.file.as_ref()
    }

    pub fn file_id(&self) -> Option<i64> {
        self.file.as_ref().map(|f| f.id)
    }

    pub fn columns(&self) -> Result<&[ColumnDef]> {
        self.cols.as_deref().ok_or_else(|| self.not_open())
    }

    fn not_open(&self) -> FeatureStoreError {
        FeatureStoreError::usage(format!("table is not open: {}", self.table_path()))
    }

    fn handle(&self) -> Result<&dyn TableHandle> {
        self.table.as_deref().ok_or_else(|| self.not_open())
    }

    fn handle_mut(&mut self) -> Result<&mut (dyn TableHandle + 'static)> {
        let path = self.table_path();
        self.table
            .as_deref_mut()
            .ok_or_else(|| FeatureStoreError::usage(format!("table is not open: {path}")))
    }

    /// Re-opens a table that was closed since it was last used.
    fn ensure_open(&mut self) -> Result<()> {
        if self.table.is_some() {
            return Ok(());
        }
        let owner_id = match self.owner_id {
            Some(id) => id,
            None => return Err(self.not_open()),
        };
        self.get_or_create(owner_id, None::<&[&str]>)
    }

    /// Opens the table for `(name, space, owner_id)`, or creates it when
    /// `column_names` is given.
    pub fn get_or_create<S: AsRef<str>>(
        &mut self,
        owner_id: i64,
        column_names: Option<&[S]>,
    ) -> Result<()> {
        let path = self.table_path();
        if self.table.is_some() {
            if column_names.is_some() {
                return Err(FeatureStoreError::TableAlreadyOpen { path });
            }
            if self.cols.is_none() {
                return Err(FeatureStoreError::backend(
                    "get table",
                    format!("open table has no columns: {path}"),
                ));
            }
            return Ok(());
        }

        match column_names {
            Some(names) => {
                self.check_creatable(owner_id, names)?;
                self.new_table(names)
            }
            None => {
                let file = self.locate(owner_id)?;
                self.open_table(file)
            }
        }
    }

    /// Resolves the single backing file for `owner_id` without opening it.
    pub fn locate(&mut self, owner_id: i64) -> Result<OriginalFile> {
        let mut files = self.find_table_files(owner_id)?;
        if files.len() > 1 {
            return Err(FeatureStoreError::too_many_tables(self.table_path(), files.len()));
        }
        let file = files
            .pop()
            .ok_or_else(|| FeatureStoreError::table_not_found(self.table_path()))?;
        self.owner_id = Some(owner_id);
        Ok(file)
    }

    /// Checks that `new_table` can succeed for the caller as `owner_id`:
    /// names are valid, no table exists yet and the caller is the owner.
    pub fn check_creatable<S: AsRef<str>>(
        &mut self,
        owner_id: i64,
        column_names: &[S],
    ) -> Result<()> {
        validate_new_names(column_names)?;
        let files = self.find_table_files(owner_id)?;
        if !files.is_empty() {
            return Err(FeatureStoreError::too_many_tables(self.table_path(), files.len()));
        }
        let caller = self.session.identity().current_user()?;
        if caller.user_id != owner_id {
            return Err(FeatureStoreError::OwnerMismatch {
                caller_id: caller.user_id,
                owner_id,
            });
        }
        self.owner_id = Some(owner_id);
        Ok(())
    }

    fn find_table_files(&self, owner_id: i64) -> Result<Vec<OriginalFile>> {
        let query = ObjectQuery::new(ORIGINAL_FILE_TYPE)
            .eq("name", self.name.as_str())
            .eq("path", self.config.ft_space.as_str())
            .eq("details.owner.id", owner_id);
        self.session
            .query()
            .find_all(&query)?
            .iter()
            .map(OriginalFile::from_object)
            .collect()
    }

    /// Creates and initialises the remote table. Names are validated before
    /// anything is created; if initialisation fails the new file is deleted.
    pub fn new_table<S: AsRef<str>>(&mut self, column_names: &[S]) -> Result<()> {
        if self.table.is_some() {
            return Err(FeatureStoreError::TableAlreadyOpen {
                path: self.table_path(),
            });
        }
        validate_new_names(column_names)?;
        let encoded = format_names(column_names);
        if encoded.len() > self.config.max_column_name_bytes {
            warn!(
                table = %self.name,
                bytes = encoded.len(),
                limit = self.config.max_column_name_bytes,
                "combined feature names exceed the column attribute size limit"
            );
        }

        let path = self.table_path();
        let tables = self.session.tables();
        let mut table = tables.new_table(&path)?;
        let mut file = match table.original_file() {
            Ok(file) => file,
            Err(err) => {
                close_quietly(&mut *table, &path);
                return Err(err);
            }
        };

        // Some servers store the whole path as the file name; fix it up and
        // re-open so the handle sees the saved file.
        if file.path != self.config.ft_space || file.name != self.name {
            warn!(
                file_id = file.id,
                path = %file.path,
                name = %file.name,
                "overriding table path and name"
            );
            let mut renamed = file.clone();
            renamed.path = self.config.ft_space.clone();
            renamed.name = self.name.clone();
            close_quietly(&mut *table, &path);
            let reopened = self
                .session
                .update()
                .save_file(renamed)
                .and_then(|saved| Ok((tables.open_table(&saved)?, saved)));
            match reopened {
                Ok((t, saved)) => {
                    table = t;
                    file = saved;
                }
                Err(err) => {
                    self.discard_new_file(&file);
                    return Err(err);
                }
            }
        }

        let mut values_col = ColumnDef::double_array(encoded, column_names.len());
        values_col.description = format_key_values(&BTreeMap::from([
            ("featureset".to_string(), self.name.clone()),
            ("namespace".to_string(), self.config.namespace.clone()),
        ]));
        let coldefs = vec![
            ColumnDef::object_id(ObjectKind::Primary),
            ColumnDef::object_id(ObjectKind::Secondary),
            values_col,
        ];
        let initialized = table
            .initialize(&coldefs)
            .and_then(|()| table.headers())
            .and_then(|headers| {
                if headers.is_empty() {
                    Err(FeatureStoreError::backend(
                        "get headers",
                        format!("failed to get columns for table ID:{}", file.id),
                    ))
                } else {
                    Ok(headers)
                }
            });
        let headers = match initialized {
            Ok(headers) => headers,
            Err(err) => {
                close_quietly(&mut *table, &path);
                self.discard_new_file(&file);
                return Err(err);
            }
        };

        info!(
            table = %self.name,
            space = %self.config.ft_space,
            file_id = file.id,
            features = column_names.len(),
            "created feature table"
        );
        self.table = Some(table);
        self.file = Some(file);
        self.cols = Some(headers);
        Ok(())
    }

    fn discard_new_file(&self, file: &OriginalFile) {
        if let Err(err) = self.session.update().delete_object(&file.object_ref()) {
            warn!(file_id = file.id, error = %err, "failed to delete partially created table");
        }
    }

    pub fn open_table(&mut self, file: OriginalFile) -> Result<()> {
        let mut table = self.session.tables().open_table(&file)?;
        let headers = match table.headers() {
            Ok(headers) if !headers.is_empty() => headers,
            Ok(_) => {
                close_quietly(&mut *table, &self.table_path());
                return Err(FeatureStoreError::backend(
                    "get headers",
                    format!("failed to get columns for table ID:{}", file.id),
                ));
            }
            Err(err) => {
                close_quietly(&mut *table, &self.table_path());
                return Err(err);
            }
        };
        info!(table = %self.name, file_id = file.id, owner_id = file.owner_id, "opened feature table");
        self.table = Some(table);
        self.file = Some(file);
        self.cols = Some(headers);
        Ok(())
    }

    /// Releases the remote handle. State is cleared even if the remote close
    /// fails; the error is still returned.
    pub fn close(&mut self) -> Result<()> {
        self.cols = None;
        self.feature_names = None;
        self.chunk_size = None;
        match self.table.take() {
            Some(mut table) => {
                debug!(table = %self.name, "closing feature table");
                table.close()
            }
            None => Ok(()),
        }
    }

    /// Feature names in column order, decoded from the value column's name.
    pub fn feature_names(&mut self) -> Result<Arc<[String]>> {
        if let Some(names) = &self.feature_names {
            return Ok(Arc::clone(names));
        }
        self.ensure_open()?;
        let value_col = self.values_column()?;
        let names = parse_names(&value_col.name)?;
        if names.len() != value_col.width() {
            return Err(FeatureStoreError::backend(
                "get headers",
                format!(
                    "{} feature names for a column of width {}",
                    names.len(),
                    value_col.width()
                ),
            ));
        }
        let names: Arc<[String]> = names.into();
        self.feature_names = Some(Arc::clone(&names));
        Ok(names)
    }

    fn values_column(&self) -> Result<&ColumnDef> {
        self.columns()?.get(2).ok_or_else(|| {
            FeatureStoreError::backend("get headers", "table has no feature column")
        })
    }

    /// Key/value description recorded on the feature column at creation.
    pub fn description(&mut self) -> Result<BTreeMap<String, String>> {
        self.ensure_open()?;
        let value_col = self.values_column()?;
        parse_key_values(&value_col.description)
    }

    pub fn chunk_size(&mut self) -> Result<usize> {
        if let Some(size) = self.chunk_size {
            return Ok(size);
        }
        self.ensure_open()?;
        let size = chunk_size_for(
            self.columns()?,
            self.config.max_message_bytes,
            self.config.bytes_per_scalar,
        );
        self.chunk_size = Some(size);
        Ok(size)
    }

    pub fn number_of_rows(&mut self) -> Result<u64> {
        self.ensure_open()?;
        self.handle()?.number_of_rows()
    }

    fn check_edit(&self, action: &str) -> Result<()> {
        let file = self.file.as_ref().ok_or_else(|| self.not_open())?;
        let identity = self.session.identity();
        let details = identity.object_details(&file.object_ref())?;
        let oracle = PermissionOracle::new(identity.current_user()?);
        if !oracle.can_edit(&details) {
            return Err(FeatureStoreError::PermissionDenied(format!(
                "cannot {action} table {} owned by user {}",
                self.table_path(),
                details.owner_id
            )));
        }
        Ok(())
    }

    pub fn store_by_primary(&mut self, id: i64, values: &[f64]) -> Result<u64> {
        self.store(ObjectKind::Primary, id, values, None, true)
    }

    /// Stores a row for a secondary object. Without `primary_id` the parent
    /// is looked up; pass the sentinel explicitly to store it unlinked.
    pub fn store_by_secondary(
        &mut self,
        id: i64,
        values: &[f64],
        primary_id: Option<i64>,
    ) -> Result<u64> {
        let primary_id = match primary_id {
            Some(p) => p,
            None => self.lookup_primary(id)?,
        };
        self.store(
            ObjectKind::Secondary,
            id,
            values,
            Some((ObjectKind::Primary, primary_id)),
            true,
        )
    }

    fn lookup_primary(&self, secondary_id: i64) -> Result<i64> {
        let kind = ObjectKind::Secondary;
        let field = kind.parent_field().ok_or_else(|| {
            FeatureStoreError::usage(format!("{kind} has no parent relationship"))
        })?;
        self.session
            .query()
            .parent_id(kind.object_type(), secondary_id, field)?
            .ok_or_else(|| {
                FeatureStoreError::usage(format!(
                    "no {} found for {kind} {secondary_id}; pass an explicit id",
                    ObjectKind::Primary
                ))
            })
    }

    /// Writes one row and links the identified objects to the table file.
    ///
    /// With `replace`, an existing row with the same identifier pair is
    /// overwritten (the one at the highest offset if several match) instead
    /// of appending. Returns the offset written.
    pub fn store(
        &mut self,
        kind: ObjectKind,
        id: i64,
        values: &[f64],
        linked: Option<(ObjectKind, i64)>,
        replace: bool,
    ) -> Result<u64> {
        self.ensure_open()?;
        self.check_edit("store to")?;

        let sentinel = self.config.sentinel_id;
        if id < 0 {
            return Err(FeatureStoreError::usage(format!("invalid {kind} id: {id}")));
        }
        let mut key = RowKey {
            primary: sentinel,
            secondary: sentinel,
        };
        set_key(&mut key, kind, id);
        if let Some((linked_kind, linked_id)) = linked {
            if linked_kind == kind {
                return Err(FeatureStoreError::usage(format!(
                    "linked object must differ from the stored object type {kind}"
                )));
            }
            if linked_id >= 0 {
                set_key(&mut key, linked_kind, linked_id);
            }
        }

        let width = self.feature_names()?.len();
        if values.len() != width {
            return Err(FeatureStoreError::row_shape(format!(
                "expected {width} values, received {}",
                values.len()
            )));
        }

        let targets: Vec<ObjectRef> = ObjectKind::ALL
            .into_iter()
            .filter(|k| key.id(*k) >= 0)
            .map(|k| self.resolve_object(k, key.id(k)))
            .collect::<Result<_>>()?;

        let columns = vec![
            ColumnData::Long(vec![key.primary]),
            ColumnData::Long(vec![key.secondary]),
            ColumnData::DoubleArray(vec![values.to_vec()]),
        ];
        let table = self.handle_mut()?;
        let nrows = table.number_of_rows()?;
        let existing = if replace {
            table.where_list(&key.predicate(), 0, nrows)?.into_iter().max()
        } else {
            None
        };
        let offset = match existing {
            Some(offset) => {
                table.update(&TableData {
                    row_numbers: vec![offset],
                    columns,
                })?;
                offset
            }
            None => {
                table.add_data(&columns)?;
                nrows
            }
        };
        debug!(
            table = %self.name,
            primary = key.primary,
            secondary = key.secondary,
            offset,
            updated = existing.is_some(),
            "stored feature row"
        );

        for target in &targets {
            self.link_to_file(target)?;
        }
        Ok(offset)
    }

    /// Stores one row per id, each keyed only by `kind`.
    pub fn store_many(&mut self, kind: ObjectKind, ids: &[i64], values: &[Vec<f64>]) -> Result<Vec<u64>> {
        if ids.len() != values.len() {
            return Err(FeatureStoreError::usage(format!(
                "{} ids but {} value rows",
                ids.len(),
                values.len()
            )));
        }
        ids.iter()
            .zip(values)
            .map(|(id, v)| self.store(kind, *id, v, None, true))
            .collect()
    }

    fn resolve_object(&self, kind: ObjectKind, id: i64) -> Result<ObjectRef> {
        let found = self.get_objects(kind.object_type(), [("id", Filter::Eq(id.into()))])?;
        match found.as_slice() {
            [object] => Ok(object.object_ref()),
            [] => Err(FeatureStoreError::NotFound {
                resource_type: ResourceType::Object,
                resource_id: format!("{kind}:{id}"),
            }),
            many => Err(FeatureStoreError::TooMany {
                resource_type: ResourceType::Object,
                resource_id: format!("{kind}:{id}"),
                count: many.len(),
            }),
        }
    }

    fn link_to_file(&self, parent: &ObjectRef) -> Result<()> {
        let file_id = self.file_id().ok_or_else(|| self.not_open())?;
        let annotations = self.session.annotations();
        let ns = self.config.ann_space.as_str();
        if annotations.find_file_links(parent, ns, file_id)?.is_empty() {
            let link = annotations.link_file(parent, ns, file_id)?;
            debug!(%parent, %link, file_id, "linked object to feature table");
        }
        Ok(())
    }

    pub fn fetch_by_primary(&mut self, id: i64, last: bool) -> Result<FeatureRow> {
        self.fetch_one(ObjectKind::Primary, id, last)
    }

    pub fn fetch_by_secondary(&mut self, id: i64, last: bool) -> Result<FeatureRow> {
        self.fetch_one(ObjectKind::Secondary, id, last)
    }

    fn fetch_one(&mut self, kind: ObjectKind, id: i64, last: bool) -> Result<FeatureRow> {
        let mut rows = self.fetch_by_object(kind, id)?;
        let resource_id = kind.predicate(id);
        if rows.len() > 1 && !last {
            return Err(FeatureStoreError::TooMany {
                resource_type: ResourceType::Row,
                resource_id,
                count: rows.len(),
            });
        }
        let raw = rows.pop().ok_or(FeatureStoreError::NotFound {
            resource_type: ResourceType::Row,
            resource_id,
        })?;
        self.feature_row(raw)
    }

    /// All rows stored for a primary object, in offset order.
    pub fn fetch_all(&mut self, id: i64) -> Result<Vec<FeatureRow>> {
        let rows = self.fetch_by_object(ObjectKind::Primary, id)?;
        rows.into_iter().map(|r| self.feature_row(r)).collect()
    }

    pub fn fetch_by_object(&mut self, kind: ObjectKind, id: i64) -> Result<Vec<RawRow>> {
        self.filter_raw(&kind.predicate(id))
    }

    /// Rows matching `predicate`, which is passed to the table engine as is.
    pub fn filter_raw(&mut self, predicate: &str) -> Result<Vec<RawRow>> {
        self.ensure_open()?;
        let chunk_size = self.chunk_size()?;
        let table = self.handle()?;
        let nrows = table.number_of_rows()?;
        let offsets = table.where_list(predicate, 0, nrows)?;
        let columns = chunked_read(self.columns()?, &offsets, chunk_size, |chunk| {
            table.read_coordinates(chunk)
        })?;
        columns_to_rows(columns)
    }

    pub fn filter(&mut self, predicate: &str) -> Result<Vec<FeatureRow>> {
        let rows = self.filter_raw(predicate)?;
        rows.into_iter().map(|r| self.feature_row(r)).collect()
    }

    /// Wraps a raw `(ImageID, RoiID, values)` row.
    pub fn feature_row(&mut self, raw: RawRow) -> Result<FeatureRow> {
        let names = self.feature_names()?;
        let malformed = || FeatureStoreError::backend("read row", "unexpected row layout");
        let [primary, secondary, values]: [Cell; 3] =
            raw.try_into().map_err(|_| malformed())?;
        let infovalues = vec![
            primary.as_long().ok_or_else(malformed)?,
            secondary.as_long().ok_or_else(malformed)?,
        ];
        let values = match values {
            Cell::DoubleArray(v) => v,
            Cell::Long(_) => return Err(malformed()),
        };
        let infonames: Vec<String> = ObjectKind::ALL
            .iter()
            .map(|k| k.column_name().to_string())
            .collect();
        FeatureRow::builder()
            .shared_names(names)
            .values(values)
            .info(infonames, infovalues)
            .build()
    }

    /// Deletes the table file together with every annotation and link that
    /// references it. The table is closed first and stays closed even if a
    /// delete fails.
    pub fn delete(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.check_edit("delete")?;
        let file = self.file.clone().ok_or_else(|| self.not_open())?;

        // Annotations sharing one file child can't be removed as a group, so
        // everything is deleted one object at a time.
        let annotations = self.session.annotations();
        let mut doomed = Vec::new();
        for link_type in annotations.link_types()? {
            doomed.extend(annotations.links_with_child_file(&link_type, file.id)?);
        }
        doomed.extend(annotations.file_annotations(file.id)?);
        doomed.push(file.object_ref());
        info!(
            table = %self.name,
            file_id = file.id,
            objects = ?doomed.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "deleting feature table"
        );

        self.close()?;
        self.file = None;
        let update = self.session.update();
        for object in &doomed {
            update.delete_object(object)?;
        }
        Ok(())
    }

    /// Domain objects of `object_type` matching every filter.
    pub fn get_objects<I, K>(&self, object_type: &str, filters: I) -> Result<Vec<DomainObject>>
    where
        I: IntoIterator<Item = (K, Filter)>,
        K: Into<String>,
    {
        let query = filters
            .into_iter()
            .fold(ObjectQuery::new(object_type), |q, (k, f)| q.with_filter(k, f));
        debug!(query = %query.to_query_string(), "object query");
        self.session.query().find_all(&query)
    }
}

fn validate_new_names<S: AsRef<str>>(column_names: &[S]) -> Result<()> {
    if column_names.is_empty() {
        return Err(FeatureStoreError::usage("at least one feature name is required"));
    }
    for name in column_names {
        validate_feature_name(name.as_ref())?;
    }
    Ok(())
}

/// Releases a handle on an error path, logging rather than masking the
/// original error.
fn close_quietly(table: &mut dyn TableHandle, path: &str) {
    if let Err(err) = table.close() {
        warn!(path, error = %err, "failed to close table handle");
    }
}

fn set_key(key: &mut RowKey, kind: ObjectKind, id: i64) {
    match kind {
        ObjectKind::Primary => key.primary = id,
        ObjectKind::Secondary => key.secondary = id,
    }
}

impl Closable for FeatureTable {
    fn close(&mut self) {
        if let Err(err) = FeatureTable::close(self) {
            warn!(table = %self.name, error = %err, "failed to close evicted feature table");
        }
    }
}

impl std::fmt::Debug for FeatureTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureTable")
            .field("name", &self.name)
            .field("space", &self.config.ft_space)
            .field("owner_id", &self.owner_id)
            .field("file_id", &self.file_id())
            .field("open", &self.is_open())
            .finish()
    }
}
