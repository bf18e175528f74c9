//! Access decisions over memory records.
//!
//! Pure functions over `(caller, owner, visibility)` with no store
//! access and no side effects. Every memory read or mutation goes
//! through here before it touches the repository.

use uuid::Uuid;

use crate::session::Subject;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allow,
    Deny,
}

impl Access {
    pub fn is_allowed(self) -> bool {
        matches!(self, Access::Allow)
    }
}

/// Read rule: owners always read their own records; everyone else,
/// authenticated or not, reads only public ones.
pub fn read_access(subject: Option<&Subject>, owner_id: Uuid, is_public: bool) -> Access {
    if is_public {
        return Access::Allow;
    }

    match subject {
        Some(subject) if subject.user_id == owner_id => Access::Allow,
        _ => Access::Deny,
    }
}

/// Write rule (update/delete): owner only, regardless of visibility.
pub fn write_access(subject: Option<&Subject>, owner_id: Uuid) -> Access {
    match subject {
        Some(subject) if subject.user_id == owner_id => Access::Allow,
        _ => Access::Deny,
    }
}
