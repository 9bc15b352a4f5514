//! Permission checker and the `Role` ranking used throughout the
//! dispatch pipeline.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// `viewer < operator < admin` — `Ord`/`PartialOrd` derive from
/// declared variant order, so a permission check is a single
/// comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Viewer,
    Operator,
    Admin,
}

impl Role {
    /// Case-insensitive parse; returns the default `Viewer` plus an
    /// error for unknown input.
    pub fn validate_role(s: &str) -> (Role, Result<()>) {
        match s.to_ascii_lowercase().as_str() {
            "viewer" => (Role::Viewer, Ok(())),
            "operator" => (Role::Operator, Ok(())),
            "admin" => (Role::Admin, Ok(())),
            other => (
                Role::Viewer,
                Err(AppError::InvalidParam(format!("unknown role: {other}"))),
            ),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match Role::validate_role(s) {
            (role, Ok(())) => Ok(role),
            (_, Err(e)) => Err(e),
        }
    }
}

const DEFAULT_ROLE: Role = Role::Admin;

/// Holds the method → required-role mapping. Unknown methods, and
/// empty/whitespace method names, default to `Admin`.
pub struct PermissionChecker {
    table: RwLock<HashMap<String, Role>>,
}

impl Default for PermissionChecker {
    fn default() -> Self {
        let mut table = HashMap::new();
        for (method, role) in method_catalog() {
            table.insert(method.to_string(), role);
        }
        Self {
            table: RwLock::new(table),
        }
    }
}

impl PermissionChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_required_role(&self, method: &str) -> Role {
        if method.trim().is_empty() {
            return DEFAULT_ROLE;
        }
        self.table.read().get(method).copied().unwrap_or(DEFAULT_ROLE)
    }

    /// An empty/whitespace method name is rejected for every role,
    /// even admin — there is no handler it could possibly name.
    pub fn has_permission(&self, role: Role, method: &str) -> bool {
        if method.trim().is_empty() {
            return false;
        }
        role >= self.get_required_role(method)
    }

    pub fn add_method_permission(&self, method: &str, role: Role) -> Result<()> {
        if method.trim().is_empty() {
            return Err(AppError::InvalidParam("method must not be empty".to_string()));
        }
        self.table.write().insert(method.to_string(), role);
        Ok(())
    }

    pub fn remove_method_permission(&self, method: &str) {
        self.table.write().remove(method);
    }
}

/// `ping` (viewer), `authenticate` (—, treated as viewer-gated since
/// it precedes the authentication check in the dispatch pipeline),
/// and the rest of the method catalog.
pub fn method_catalog() -> Vec<(&'static str, Role)> {
    vec![
        ("ping", Role::Viewer),
        ("authenticate", Role::Viewer),
        ("get_camera_list", Role::Viewer),
        ("get_camera_status", Role::Viewer),
        ("get_camera_capabilities", Role::Viewer),
        ("take_snapshot", Role::Operator),
        ("start_recording", Role::Operator),
        ("stop_recording", Role::Operator),
        ("list_recordings", Role::Viewer),
        ("list_snapshots", Role::Viewer),
        ("get_recording_info", Role::Viewer),
        ("get_snapshot_info", Role::Viewer),
        ("delete_recording", Role::Operator),
        ("delete_snapshot", Role::Operator),
        ("get_streams", Role::Viewer),
        ("get_metrics", Role::Admin),
        ("get_status", Role::Admin),
        ("get_server_info", Role::Admin),
        ("get_storage_info", Role::Viewer),
        ("set_retention_policy", Role::Admin),
        ("cleanup_old_files", Role::Admin),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_method_requires_admin() {
        let checker = PermissionChecker::new();
        assert_eq!(checker.get_required_role("no_such_method"), Role::Admin);
    }

    #[test]
    fn empty_method_requires_admin_for_every_role() {
        let checker = PermissionChecker::new();
        assert!(!checker.has_permission(Role::Viewer, ""));
        assert!(!checker.has_permission(Role::Operator, ""));
        assert!(!checker.has_permission(Role::Admin, ""));
    }

    #[test]
    fn every_catalog_method_gates_roles_below_required() {
        let checker = PermissionChecker::new();
        for (method, required) in method_catalog() {
            assert!(checker.has_permission(required, method));
            for role in [Role::Viewer, Role::Operator, Role::Admin] {
                if role < required {
                    assert!(!checker.has_permission(role, method), "{method} should reject {role:?}");
                }
            }
        }
    }

    #[test]
    fn add_and_remove_method_permission() {
        let checker = PermissionChecker::new();
        checker.add_method_permission("custom_method", Role::Operator).unwrap();
        assert_eq!(checker.get_required_role("custom_method"), Role::Operator);
        checker.remove_method_permission("custom_method");
        assert_eq!(checker.get_required_role("custom_method"), Role::Admin);
    }

    #[test]
    fn add_method_permission_rejects_empty_name() {
        let checker = PermissionChecker::new();
        assert!(matches!(
            checker.add_method_permission("", Role::Viewer),
            Err(AppError::InvalidParam(_))
        ));
    }

    #[test]
    fn validate_role_is_case_insensitive() {
        assert_eq!(Role::validate_role("ADMIN").0, Role::Admin);
        assert_eq!(Role::validate_role("Operator").0, Role::Operator);
        let (role, result) = Role::validate_role("bogus");
        assert_eq!(role, Role::Viewer);
        assert!(result.is_err());
    }

    #[test]
    fn role_rank_ordering() {
        assert!(Role::Viewer < Role::Operator);
        assert!(Role::Operator < Role::Admin);
    }
}
