//! Two-tier permission evaluation.
//!
//! Authorization merges two sources:
//! - role rules (`role_permissions`): per-role defaults, optionally scoped
//!   to specific resources;
//! - custom grants (`custom_permissions`): per-user overrides with optional
//!   expiry that take absolute precedence, including explicit denials.
//!
//! The evaluator answers "can user U do action A on resource R"; the
//! middleware gates routes behind one or more such checks.

mod evaluator;
mod middleware;
mod store;
mod taxonomy;

pub use evaluator::{check_custom_permissions, PermissionEvaluator};
pub use middleware::{
    enforce_permissions, filter_by_permission, require_content_edit, require_founder,
    require_permissions_edit, PermissionCheck, PermissionContext, PermissionRequirement,
    RequirementMode,
};
pub use store::{PermissionStore, SqlitePermissionStore, UserIdentity};
pub use taxonomy::{
    map_permission_key_to_custom, Capability, CapabilitySet, PermissionType, ResourceScope,
};

/// Well-known permission keys. The role table accepts arbitrary
/// `<resource>.<action>` strings; these are the ones the application itself
/// checks.
pub mod keys {
    pub const CONTENT_VIEW: &str = "content.view";
    pub const CONTENT_EDIT: &str = "content.edit";
    pub const CONTENT_DELETE: &str = "content.delete";
    pub const CONTENT_PUBLISH: &str = "content.publish";

    pub const FORMS_VIEW: &str = "forms.view";
    pub const FORMS_EDIT: &str = "forms.edit";
    pub const FORMS_DELETE: &str = "forms.delete";

    pub const BLOG_VIEW: &str = "blog.view";
    pub const BLOG_EDIT: &str = "blog.edit";
    pub const BLOG_DELETE: &str = "blog.delete";
    pub const BLOG_PUBLISH: &str = "blog.publish";

    pub const VOLUNTEERS_VIEW: &str = "volunteers.view";
    pub const VOLUNTEERS_EDIT: &str = "volunteers.edit";
    pub const VOLUNTEERS_APPROVE: &str = "volunteers.approve";
    pub const VOLUNTEERS_ASSIGN: &str = "volunteers.assign";

    pub const USERS_VIEW: &str = "users.view";
    pub const USERS_EDIT: &str = "users.edit";

    pub const PERMISSIONS_VIEW: &str = "permissions.view";
    pub const PERMISSIONS_EDIT: &str = "permissions.edit";

    pub const ADMIN_ACCESS: &str = "admin.access";
}
