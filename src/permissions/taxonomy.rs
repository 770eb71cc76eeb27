use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::keys;

/// Short capability names carried by custom grants. Closed set: a key whose
/// action has no capability (e.g. `admin.access`) can never be satisfied by
/// a custom grant and always falls through to role evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    CanView,
    CanEdit,
    CanDelete,
    CanPublish,
    CanApprove,
    CanAssign,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::CanView => "can_view",
            Capability::CanEdit => "can_edit",
            Capability::CanDelete => "can_delete",
            Capability::CanPublish => "can_publish",
            Capability::CanApprove => "can_approve",
            Capability::CanAssign => "can_assign",
        }
    }
}

/// Capability booleans on a custom grant. Absent means "this grant says
/// nothing about that capability" and is distinct from an explicit `false`
/// (which is a denial that overrides role rules).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CapabilitySet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub can_view: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub can_edit: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub can_delete: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub can_publish: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub can_approve: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub can_assign: Option<bool>,
}

impl CapabilitySet {
    pub fn get(&self, capability: Capability) -> Option<bool> {
        match capability {
            Capability::CanView => self.can_view,
            Capability::CanEdit => self.can_edit,
            Capability::CanDelete => self.can_delete,
            Capability::CanPublish => self.can_publish,
            Capability::CanApprove => self.can_approve,
            Capability::CanAssign => self.can_assign,
        }
    }

    pub fn with(mut self, capability: Capability, value: bool) -> Self {
        match capability {
            Capability::CanView => self.can_view = Some(value),
            Capability::CanEdit => self.can_edit = Some(value),
            Capability::CanDelete => self.can_delete = Some(value),
            Capability::CanPublish => self.can_publish = Some(value),
            Capability::CanApprove => self.can_approve = Some(value),
            Capability::CanAssign => self.can_assign = Some(value),
        }
        self
    }
}

/// Coarse resource-type tag on a custom grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PermissionType {
    ContentBlock,
    Form,
    BlogPost,
    Volunteer,
}

impl PermissionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionType::ContentBlock => "content_block",
            PermissionType::Form => "form",
            PermissionType::BlogPost => "blog_post",
            PermissionType::Volunteer => "volunteer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "content_block" => Some(PermissionType::ContentBlock),
            "form" => Some(PermissionType::Form),
            "blog_post" => Some(PermissionType::BlogPost),
            "volunteer" => Some(PermissionType::Volunteer),
            _ => None,
        }
    }

    /// Permission keys a grant of this type can satisfy.
    pub fn allowed_keys(&self) -> &'static [&'static str] {
        match self {
            PermissionType::ContentBlock => &[
                keys::CONTENT_VIEW,
                keys::CONTENT_EDIT,
                keys::CONTENT_DELETE,
                keys::CONTENT_PUBLISH,
            ],
            PermissionType::Form => &[keys::FORMS_VIEW, keys::FORMS_EDIT, keys::FORMS_DELETE],
            PermissionType::BlogPost => &[
                keys::BLOG_VIEW,
                keys::BLOG_EDIT,
                keys::BLOG_DELETE,
                keys::BLOG_PUBLISH,
            ],
            PermissionType::Volunteer => &[
                keys::VOLUNTEERS_VIEW,
                keys::VOLUNTEERS_EDIT,
                keys::VOLUNTEERS_APPROVE,
                keys::VOLUNTEERS_ASSIGN,
            ],
        }
    }
}

/// Translate a permission key action to its custom-grant capability.
/// Unrecognized keys return `None` and always fall through to role rules.
pub fn map_permission_key_to_custom(permission_key: &str) -> Option<Capability> {
    let (_, action) = permission_key.split_once('.')?;
    match action {
        "view" => Some(Capability::CanView),
        "edit" => Some(Capability::CanEdit),
        "delete" => Some(Capability::CanDelete),
        "publish" => Some(Capability::CanPublish),
        "approve" => Some(Capability::CanApprove),
        "assign" => Some(Capability::CanAssign),
        _ => None,
    }
}

/// Optional resource predicate on a role rule. A rule without a scope applies
/// globally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum ResourceScope {
    /// Explicit list of allowed resource ids.
    Ids { ids: Vec<String> },
    /// Wildcard pattern, `*` matching any run of characters.
    Pattern { pattern: String },
}

impl ResourceScope {
    /// A scoped rule only applies when the request names a resource the
    /// scope covers; a scoped rule never matches a resource-less request.
    pub fn matches(&self, resource_id: Option<&str>) -> bool {
        let Some(resource_id) = resource_id else {
            return false;
        };
        match self {
            ResourceScope::Ids { ids } => ids.iter().any(|id| id == resource_id),
            ResourceScope::Pattern { pattern } => pattern_matches(pattern, resource_id),
        }
    }
}

fn pattern_matches(pattern: &str, value: &str) -> bool {
    let mut rest = value;
    let mut parts = pattern.split('*').peekable();

    // First segment must anchor at the start.
    if let Some(first) = parts.next() {
        if !rest.starts_with(first) {
            return false;
        }
        rest = &rest[first.len()..];
        if parts.peek().is_none() {
            // No wildcard at all: exact match required.
            return rest.is_empty();
        }
    }

    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            // Last segment must anchor at the end.
            return part.is_empty() || rest.ends_with(part);
        }
        if part.is_empty() {
            continue;
        }
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_actions_to_capabilities() {
        assert_eq!(
            map_permission_key_to_custom("content.edit"),
            Some(Capability::CanEdit)
        );
        assert_eq!(
            map_permission_key_to_custom("volunteers.approve"),
            Some(Capability::CanApprove)
        );
    }

    #[test]
    fn unknown_keys_map_to_none() {
        assert_eq!(map_permission_key_to_custom("unknown.permission"), None);
        assert_eq!(map_permission_key_to_custom("admin.access"), None);
        assert_eq!(map_permission_key_to_custom("no-dot"), None);
    }

    #[test]
    fn permission_type_key_sets() {
        assert!(PermissionType::ContentBlock
            .allowed_keys()
            .contains(&keys::CONTENT_PUBLISH));
        assert!(!PermissionType::Form
            .allowed_keys()
            .contains(&keys::CONTENT_EDIT));
    }

    #[test]
    fn id_list_scope_matches_only_listed_ids() {
        let scope = ResourceScope::Ids {
            ids: vec!["a".into(), "b".into()],
        };
        assert!(scope.matches(Some("a")));
        assert!(!scope.matches(Some("c")));
        assert!(!scope.matches(None));
    }

    #[test]
    fn pattern_scope_supports_wildcards() {
        let scope = ResourceScope::Pattern {
            pattern: "blog-*".into(),
        };
        assert!(scope.matches(Some("blog-2024")));
        assert!(!scope.matches(Some("news-2024")));

        let exact = ResourceScope::Pattern {
            pattern: "page-1".into(),
        };
        assert!(exact.matches(Some("page-1")));
        assert!(!exact.matches(Some("page-10")));

        let infix = ResourceScope::Pattern {
            pattern: "camp-*-draft".into(),
        };
        assert!(infix.matches(Some("camp-summer-draft")));
        assert!(!infix.matches(Some("camp-summer-final")));
    }

    #[test]
    fn capability_set_distinguishes_absent_from_false() {
        let set = CapabilitySet::default().with(Capability::CanEdit, false);
        assert_eq!(set.get(Capability::CanEdit), Some(false));
        assert_eq!(set.get(Capability::CanView), None);
    }

    #[test]
    fn scope_json_round_trip() {
        let scope = ResourceScope::Ids {
            ids: vec!["r1".into()],
        };
        let json = serde_json::to_string(&scope).unwrap();
        assert_eq!(json, r#"{"ids":["r1"]}"#);
        let back: ResourceScope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, scope);

        let pattern: ResourceScope = serde_json::from_str(r#"{"pattern":"blog-*"}"#).unwrap();
        assert_eq!(
            pattern,
            ResourceScope::Pattern {
                pattern: "blog-*".into()
            }
        );
    }
}
