use anyhow::Error;
use once_cell::sync::Lazy;
use rocket::serde::Serialize;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ViewOwnProfile,
    ViewPublishedContent,
    CompleteLessons,
    SubmitQuizzes,
    SubmitAssignments,

    ViewDraftContent,
    ViewAllProgress,
    AuditLedger,
    BanMembers,

    BanAdmins,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Member,
    Admin,
    SuperAdmin,
}

static MEMBER_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.insert(Permission::ViewOwnProfile);
    permissions.insert(Permission::ViewPublishedContent);
    permissions.insert(Permission::CompleteLessons);
    permissions.insert(Permission::SubmitQuizzes);
    permissions.insert(Permission::SubmitAssignments);

    permissions
});

static ADMIN_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.extend(MEMBER_PERMISSIONS.iter().copied());

    permissions.insert(Permission::ViewDraftContent);
    permissions.insert(Permission::ViewAllProgress);
    permissions.insert(Permission::AuditLedger);
    permissions.insert(Permission::BanMembers);

    permissions
});

static SUPER_ADMIN_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.extend(ADMIN_PERMISSIONS.iter().copied());

    permissions.insert(Permission::BanAdmins);

    permissions
});

impl Role {
    pub fn permissions(&self) -> &'static HashSet<Permission> {
        match self {
            Role::Member => &MEMBER_PERMISSIONS,
            Role::Admin => &ADMIN_PERMISSIONS,
            Role::SuperAdmin => &SUPER_ADMIN_PERMISSIONS,
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Member => "member",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "member" => Ok(Role::Member),
            "admin" => Ok(Role::Admin),
            "super_admin" => Ok(Role::SuperAdmin),
            _ => Err(Error::msg(format!("Unknown role: {}", s))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::{Permission, Role};

    #[test]
    fn roles_inherit_lower_permissions() {
        for permission in Role::Member.permissions() {
            assert!(Role::Admin.has_permission(*permission));
            assert!(Role::SuperAdmin.has_permission(*permission));
        }
        for permission in Role::Admin.permissions() {
            assert!(Role::SuperAdmin.has_permission(*permission));
        }
    }

    #[test]
    fn only_super_admins_ban_admins() {
        assert!(!Role::Member.has_permission(Permission::BanMembers));
        assert!(Role::Admin.has_permission(Permission::BanMembers));
        assert!(!Role::Admin.has_permission(Permission::BanAdmins));
        assert!(Role::SuperAdmin.has_permission(Permission::BanAdmins));
    }

    #[test]
    fn role_names_round_trip() {
        for role in [Role::Member, Role::Admin, Role::SuperAdmin] {
            assert_eq!(Role::from_str(role.as_str()).unwrap(), role);
        }
        assert!(Role::from_str("coach").is_err());
    }
}
