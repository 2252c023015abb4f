/// Generic row types. Documents are JSON objects; the typed view of each
/// collection lives in connect-types.
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Identities,
    Conversations,
    Messages,
}

impl Collection {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Identities => "identities",
            Self::Conversations => "conversations",
            Self::Messages => "messages",
        }
    }
}

/// Who a permission entry admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Any,
    User(Uuid),
}

impl Role {
    pub fn tag(&self) -> String {
        match self {
            Self::Any => "any".to_string(),
            Self::User(id) => format!("user:{}", id),
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        if tag == "any" {
            return Some(Self::Any);
        }
        tag.strip_prefix("user:")
            .and_then(|id| id.parse().ok())
            .map(Self::User)
    }
}

/// Row-level permission lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Permissions {
    pub read: Vec<Role>,
    pub update: Vec<Role>,
    pub delete: Vec<Role>,
}

impl Permissions {
    /// Readable by anyone, writable only by `owner`.
    pub fn public_read(owner: Uuid) -> Self {
        Self {
            read: vec![Role::Any],
            update: vec![Role::User(owner)],
            delete: vec![Role::User(owner)],
        }
    }

    /// Read/update for every member, delete for `deleter` only.
    pub fn members<I>(members: I, deleter: Uuid) -> Self
    where
        I: IntoIterator<Item = Uuid>,
    {
        let members: Vec<Role> = members.into_iter().map(Role::User).collect();
        Self {
            read: members.clone(),
            update: members,
            delete: vec![Role::User(deleter)],
        }
    }

    pub fn can_read(&self, actor: Uuid) -> bool {
        admits(&self.read, actor)
    }

    pub fn can_update(&self, actor: Uuid) -> bool {
        admits(&self.update, actor)
    }

    pub fn can_delete(&self, actor: Uuid) -> bool {
        admits(&self.delete, actor)
    }
}

fn admits(roles: &[Role], actor: Uuid) -> bool {
    roles.iter().any(|r| *r == Role::Any || *r == Role::User(actor))
}

#[derive(Debug, Clone)]
pub struct Row {
    pub collection: Collection,
    pub id: Uuid,
    pub data: Map<String, Value>,
    pub permissions: Permissions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_tags_roundtrip() {
        let id = Uuid::new_v4();
        assert_eq!(Role::from_tag(&Role::Any.tag()), Some(Role::Any));
        assert_eq!(Role::from_tag(&Role::User(id).tag()), Some(Role::User(id)));
        assert_eq!(Role::from_tag("team:x"), None);
    }

    #[test]
    fn member_permissions() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let outsider = Uuid::new_v4();
        let perms = Permissions::members([a, b], a);

        assert!(perms.can_read(b) && perms.can_update(b));
        assert!(perms.can_delete(a) && !perms.can_delete(b));
        assert!(!perms.can_read(outsider));
    }
}
