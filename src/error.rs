use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Table,
    Row,
    Object,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceType::Table => write!(f, "table"),
            ResourceType::Row => write!(f, "row"),
            ResourceType::Object => write!(f, "object"),
        }
    }
}

/// Coarse error taxonomy. Callers branch on this rather than on messages,
/// e.g. treat `NoMatch` from a lookup as "create it".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Usage,
    NoMatch,
    TooMany,
    PermissionDenied,
    RowShape,
    Backend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureStoreErrorCode {
    Usage,
    InvalidConfig,
    InvalidFeatureName,
    UnknownName,
    UnsupportedObjectType,
    TableAlreadyOpen,
    OwnerMismatch,
    TableNotFound,
    RowNotFound,
    ObjectNotFound,
    TooManyTables,
    MultipleRows,
    TooManyObjects,
    PermissionDenied,
    RowShape,
    Backend,
}

impl FeatureStoreErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            FeatureStoreErrorCode::Usage => "usage",
            FeatureStoreErrorCode::InvalidConfig => "invalid_config",
            FeatureStoreErrorCode::InvalidFeatureName => "invalid_feature_name",
            FeatureStoreErrorCode::UnknownName => "unknown_name",
            FeatureStoreErrorCode::UnsupportedObjectType => "unsupported_object_type",
            FeatureStoreErrorCode::TableAlreadyOpen => "table_already_open",
            FeatureStoreErrorCode::OwnerMismatch => "owner_mismatch",
            FeatureStoreErrorCode::TableNotFound => "table_not_found",
            FeatureStoreErrorCode::RowNotFound => "row_not_found",
            FeatureStoreErrorCode::ObjectNotFound => "object_not_found",
            FeatureStoreErrorCode::TooManyTables => "too_many_tables",
            FeatureStoreErrorCode::MultipleRows => "multiple_rows",
            FeatureStoreErrorCode::TooManyObjects => "too_many_objects",
            FeatureStoreErrorCode::PermissionDenied => "permission_denied",
            FeatureStoreErrorCode::RowShape => "row_shape",
            FeatureStoreErrorCode::Backend => "backend",
        }
    }

    pub fn kind(self) -> ErrorKind {
        match self {
            FeatureStoreErrorCode::Usage
            | FeatureStoreErrorCode::InvalidConfig
            | FeatureStoreErrorCode::InvalidFeatureName
            | FeatureStoreErrorCode::UnknownName
            | FeatureStoreErrorCode::UnsupportedObjectType
            | FeatureStoreErrorCode::TableAlreadyOpen
            | FeatureStoreErrorCode::OwnerMismatch => ErrorKind::Usage,
            FeatureStoreErrorCode::TableNotFound
            | FeatureStoreErrorCode::RowNotFound
            | FeatureStoreErrorCode::ObjectNotFound => ErrorKind::NoMatch,
            FeatureStoreErrorCode::TooManyTables
            | FeatureStoreErrorCode::MultipleRows
            | FeatureStoreErrorCode::TooManyObjects => ErrorKind::TooMany,
            FeatureStoreErrorCode::PermissionDenied => ErrorKind::PermissionDenied,
            FeatureStoreErrorCode::RowShape => ErrorKind::RowShape,
            FeatureStoreErrorCode::Backend => ErrorKind::Backend,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeatureStoreError {
    #[error("usage error: {0}")]
    Usage(String),
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },
    #[error("invalid feature name '{name}': {reason}")]
    InvalidFeatureName { name: String, reason: String },
    #[error("unknown name '{0}'")]
    UnknownName(String),
    #[error("unsupported object type: {0}")]
    UnsupportedObjectType(String),
    #[error("new table requested but already open: {path}")]
    TableAlreadyOpen { path: String },
    #[error("cannot create table for a different user (caller {caller_id}, owner {owner_id})")]
    OwnerMismatch { caller_id: i64, owner_id: i64 },
    #[error("no {resource_type} found for: {resource_id}")]
    NotFound {
        resource_type: ResourceType,
        resource_id: String,
    },
    #[error("{count} {resource_type}s found for: {resource_id}")]
    TooMany {
        resource_type: ResourceType,
        resource_id: String,
        count: usize,
    },
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("row shape error: {0}")]
    RowShape(String),
    #[error("backend error during {operation}: {message}")]
    Backend { operation: String, message: String },
}

impl FeatureStoreError {
    pub fn usage(message: impl Into<String>) -> Self {
        FeatureStoreError::Usage(message.into())
    }

    pub fn row_shape(message: impl Into<String>) -> Self {
        FeatureStoreError::RowShape(message.into())
    }

    pub fn backend(operation: impl Into<String>, message: impl Into<String>) -> Self {
        FeatureStoreError::Backend {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn table_not_found(path: impl Into<String>) -> Self {
        FeatureStoreError::NotFound {
            resource_type: ResourceType::Table,
            resource_id: path.into(),
        }
    }

    pub fn too_many_tables(path: impl Into<String>, count: usize) -> Self {
        FeatureStoreError::TooMany {
            resource_type: ResourceType::Table,
            resource_id: path.into(),
            count,
        }
    }

    pub fn code(&self) -> FeatureStoreErrorCode {
        match self {
            FeatureStoreError::Usage(_) => FeatureStoreErrorCode::Usage,
            FeatureStoreError::InvalidConfig { .. } => FeatureStoreErrorCode::InvalidConfig,
            FeatureStoreError::InvalidFeatureName { .. } => {
                FeatureStoreErrorCode::InvalidFeatureName
            }
            FeatureStoreError::UnknownName(_) => FeatureStoreErrorCode::UnknownName,
            FeatureStoreError::UnsupportedObjectType(_) => {
                FeatureStoreErrorCode::UnsupportedObjectType
            }
            FeatureStoreError::TableAlreadyOpen { .. } => FeatureStoreErrorCode::TableAlreadyOpen,
            FeatureStoreError::OwnerMismatch { .. } => FeatureStoreErrorCode::OwnerMismatch,
            FeatureStoreError::NotFound { resource_type, .. } => match resource_type {
                ResourceType::Table => FeatureStoreErrorCode::TableNotFound,
                ResourceType::Row => FeatureStoreErrorCode::RowNotFound,
                ResourceType::Object => FeatureStoreErrorCode::ObjectNotFound,
            },
            FeatureStoreError::TooMany { resource_type, .. } => match resource_type {
                ResourceType::Table => FeatureStoreErrorCode::TooManyTables,
                ResourceType::Row => FeatureStoreErrorCode::MultipleRows,
                ResourceType::Object => FeatureStoreErrorCode::TooManyObjects,
            },
            FeatureStoreError::PermissionDenied(_) => FeatureStoreErrorCode::PermissionDenied,
            FeatureStoreError::RowShape(_) => FeatureStoreErrorCode::RowShape,
            FeatureStoreError::Backend { .. } => FeatureStoreErrorCode::Backend,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    pub fn kind(&self) -> ErrorKind {
        self.code().kind()
    }
}

pub type Result<T, E = FeatureStoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::{ErrorKind, FeatureStoreError, FeatureStoreErrorCode, ResourceType};

    #[test]
    fn error_code_strings_are_stable() {
        assert_eq!(FeatureStoreErrorCode::TableNotFound.as_str(), "table_not_found");
        assert_eq!(FeatureStoreErrorCode::TooManyTables.as_str(), "too_many_tables");
        assert_eq!(
            FeatureStoreErrorCode::PermissionDenied.as_str(),
            "permission_denied"
        );
    }

    #[test]
    fn cardinality_errors_map_to_kinds() {
        let none = FeatureStoreError::table_not_found("ns/features/fsA");
        assert_eq!(none.code(), FeatureStoreErrorCode::TableNotFound);
        assert_eq!(none.kind(), ErrorKind::NoMatch);

        let many = FeatureStoreError::TooMany {
            resource_type: ResourceType::Row,
            resource_id: "ImageID==7".into(),
            count: 2,
        };
        assert_eq!(many.code_str(), "multiple_rows");
        assert_eq!(many.kind(), ErrorKind::TooMany);
        assert_eq!(many.to_string(), "2 rows found for: ImageID==7");
    }

    #[test]
    fn usage_family_shares_one_kind() {
        let errors = [
            FeatureStoreError::usage("x"),
            FeatureStoreError::UnknownName("x".into()),
            FeatureStoreError::OwnerMismatch {
                caller_id: 1,
                owner_id: 2,
            },
            FeatureStoreError::TableAlreadyOpen { path: "p".into() },
        ];
        for err in errors {
            assert_eq!(err.kind(), ErrorKind::Usage, "{err}");
        }
        assert_eq!(
            FeatureStoreError::row_shape("bad").kind(),
            ErrorKind::RowShape
        );
    }
}
