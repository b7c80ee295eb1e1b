//! Named feature-vector tables stored on a remote table service.
//!
//! A feature set is a table of `(ImageID, RoiID, values[])` rows. Rows are
//! linked back to the objects they describe through file annotations, so
//! they can be found from either side.

pub mod cache;
pub mod config;
pub mod error;
pub mod manager;
pub mod memory;
pub mod metadata;
pub mod names;
pub mod permission;
pub mod row;
pub mod session;
pub mod table;

pub use config::FeatureStoreConfig;
pub use error::{ErrorKind, FeatureStoreError, FeatureStoreErrorCode, Result};
pub use manager::{FeatureTableManager, TableKey};
pub use metadata::{MapAnnotations, TypedCondition, TypedValue};
pub use row::{FeatureRow, RowValue};
pub use session::Session;
pub use table::columns::ObjectKind;
pub use table::{FeatureTable, RowKey};
