use serde::{Deserialize, Serialize};

/// Identity of the user a session acts for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CallerContext {
    pub user_id: i64,
    #[serde(default)]
    pub group_id: i64,
}

impl CallerContext {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            group_id: 0,
        }
    }

    pub fn with_group(mut self, group_id: i64) -> Self {
        self.group_id = group_id;
        self
    }
}

/// Per-object permission flags as reported by the server for the calling user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PermissionFlags {
    pub can_edit: bool,
    pub can_annotate: bool,
    pub can_delete: bool,
    pub can_link: bool,
}

impl PermissionFlags {
    pub fn all() -> Self {
        Self {
            can_edit: true,
            can_annotate: true,
            can_delete: true,
            can_link: true,
        }
    }

    pub fn read_only() -> Self {
        Self::default()
    }

    /// Read-annotate: others may annotate but not edit.
    pub fn annotate_only() -> Self {
        Self {
            can_annotate: true,
            can_link: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectDetails {
    pub owner_id: i64,
    #[serde(default)]
    pub group_id: i64,
    pub permissions: PermissionFlags,
}

/// Answers edit/annotate questions for one caller. Callers consult it and
/// raise their own errors; it enforces nothing.
#[derive(Debug, Clone, Copy)]
pub struct PermissionOracle {
    caller: CallerContext,
}

impl PermissionOracle {
    pub fn new(caller: CallerContext) -> Self {
        Self { caller }
    }

    pub fn caller(&self) -> CallerContext {
        self.caller
    }

    /// Edit requires ownership as well as the edit flag; group admins with
    /// edit rights on someone else's table are still refused.
    pub fn can_edit(&self, details: &ObjectDetails) -> bool {
        details.owner_id == self.caller.user_id && details.permissions.can_edit
    }

    pub fn can_annotate(&self, details: &ObjectDetails) -> bool {
        details.permissions.can_annotate
    }
}

#[cfg(test)]
mod tests {
    use super::{CallerContext, ObjectDetails, PermissionFlags, PermissionOracle};

    fn details(owner_id: i64, permissions: PermissionFlags) -> ObjectDetails {
        ObjectDetails {
            owner_id,
            group_id: 0,
            permissions,
        }
    }

    #[test]
    fn edit_requires_owner_and_flag() {
        let oracle = PermissionOracle::new(CallerContext::new(5));
        assert!(oracle.can_edit(&details(5, PermissionFlags::all())));
        assert!(!oracle.can_edit(&details(6, PermissionFlags::all())));
        assert!(!oracle.can_edit(&details(5, PermissionFlags::read_only())));
    }

    #[test]
    fn annotate_ignores_ownership() {
        let oracle = PermissionOracle::new(CallerContext::new(5));
        assert!(oracle.can_annotate(&details(6, PermissionFlags::annotate_only())));
        assert!(!oracle.can_annotate(&details(5, PermissionFlags::read_only())));
    }
}
