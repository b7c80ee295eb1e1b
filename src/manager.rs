use crate::cache::ClosableCache;
use crate::config::FeatureStoreConfig;
use crate::error::{ErrorKind, FeatureStoreError, Result};
use crate::session::Session;
use crate::table::FeatureTable;
use tracing::debug;

/// Cache key: feature-set name plus the owner of the backing table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableKey {
    pub name: String,
    pub owner_id: i64,
}

impl TableKey {
    pub fn new(name: impl Into<String>, owner_id: i64) -> Self {
        Self {
            name: name.into(),
            owner_id,
        }
    }
}

/// Hands out feature tables by name, keeping at most `cache_size` of them
/// open. Tables that fall out of the cache are closed.
pub struct FeatureTableManager {
    session: Session,
    config: FeatureStoreConfig,
    tables: ClosableCache<TableKey, FeatureTable>,
}

impl FeatureTableManager {
    pub fn new(session: Session, config: FeatureStoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            tables: ClosableCache::new(config.cache_size),
            session,
            config,
        })
    }

    pub fn config(&self) -> &FeatureStoreConfig {
        &self.config
    }

    /// Number of cached tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    fn caller_id(&self) -> Result<i64> {
        Ok(self.session.identity().current_user()?.user_id)
    }

    /// Creates feature set `name` for the caller. Fails with `TooMany` if it
    /// already exists; creation is never silently idempotent.
    pub fn create<S: AsRef<str>>(
        &mut self,
        name: &str,
        column_names: &[S],
    ) -> Result<&mut FeatureTable> {
        let owner_id = self.caller_id()?;
        let key = TableKey::new(name, owner_id);
        if self.tables.peek(&key).is_some_and(FeatureTable::is_open) {
            return Err(FeatureStoreError::too_many_tables(
                format!("{}/{name}", self.config.ft_space),
                1,
            ));
        }
        let mut table = FeatureTable::new(self.session.clone(), &self.config, name);
        table.check_creatable(owner_id, column_names)?;
        self.tables.make_room_for(&key);
        table.new_table(column_names)?;
        self.tables.insert(key.clone(), table);
        self.cached(&key)
    }

    /// Feature set `name` owned by `owner_id` (default: caller), opening it
    /// if it is not cached or was closed.
    pub fn get(&mut self, name: &str, owner_id: Option<i64>) -> Result<&mut FeatureTable> {
        let owner_id = match owner_id {
            Some(id) => id,
            None => self.caller_id()?,
        };
        let key = TableKey::new(name, owner_id);
        if !self.tables.peek(&key).is_some_and(FeatureTable::is_open) {
            debug!(name, owner_id, "feature table not cached, opening");
            // Resolve the file first so a missing table never evicts a
            // cached one.
            let mut table = FeatureTable::new(self.session.clone(), &self.config, name);
            let file = table.locate(owner_id)?;
            self.tables.make_room_for(&key);
            table.open_table(file)?;
            self.tables.insert(key.clone(), table);
        }
        self.cached(&key)
    }

    /// Like [`FeatureTableManager::get`] but `None` when the table does not
    /// exist.
    pub fn find(&mut self, name: &str, owner_id: Option<i64>) -> Result<Option<&mut FeatureTable>> {
        match self.get(name, owner_id) {
            Ok(table) => Ok(Some(table)),
            Err(err) if err.kind() == ErrorKind::NoMatch => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn cached(&mut self, key: &TableKey) -> Result<&mut FeatureTable> {
        self.tables.get_mut(key).ok_or_else(|| {
            FeatureStoreError::backend("cache lookup", format!("{} missing after insert", key.name))
        })
    }

    /// Closes every cached table.
    pub fn close(&mut self) {
        self.tables.close();
    }
}

impl std::fmt::Debug for FeatureTableManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureTableManager")
            .field("ft_space", &self.config.ft_space)
            .field("cached", &self.tables.len())
            .field("capacity", &self.tables.capacity())
            .finish()
    }
}
