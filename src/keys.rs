//! Fixed-width composite key encoding for LMDB index tables.
//!
//! Every identifier is a 16-byte UUID, so composite keys are plain
//! concatenations: no length prefixes, no delimiters. A prefix scan on the
//! first id lists everything under it, in byte order of the second part.
//!
//! - `children`:         [parent][child]
//! - `memberships`:      [space][user]
//! - `role_assignments`: [role][user]
//! - `page_permissions`: [page][assignee tag][assignee id]
//! - `inheritors`:       [origin permission][inheriting permission]

use uuid::Uuid;

use crate::model::PermissionAssignee;

pub const ID_LEN: usize = 16;
pub const ASSIGNEE_LEN: usize = ID_LEN + 1;

/// Build a pair key from two ids
#[inline]
pub fn pair(a: &Uuid, b: &Uuid) -> [u8; 2 * ID_LEN] {
    let mut k = [0u8; 2 * ID_LEN];
    k[..ID_LEN].copy_from_slice(a.as_bytes());
    k[ID_LEN..].copy_from_slice(b.as_bytes());
    k
}

/// Prefix for scanning every key under `a`
#[inline]
pub fn prefix(a: &Uuid) -> [u8; ID_LEN] {
    *a.as_bytes()
}

/// Assignee identity: one tag byte, then the id (zeroed for public)
#[inline]
pub fn assignee_key(assignee: &PermissionAssignee) -> [u8; ASSIGNEE_LEN] {
    let mut k = [0u8; ASSIGNEE_LEN];
    k[0] = match assignee {
        PermissionAssignee::User { .. } => 1,
        PermissionAssignee::Role { .. } => 2,
        PermissionAssignee::Space { .. } => 3,
        PermissionAssignee::Public => 4,
    };
    if let Some(id) = assignee.id() {
        k[1..].copy_from_slice(id.as_bytes());
    }
    k
}

/// Build the `(page, assignee)` uniqueness key
#[inline]
pub fn page_assignee(page: &Uuid, assignee: &PermissionAssignee) -> [u8; ID_LEN + ASSIGNEE_LEN] {
    let mut k = [0u8; ID_LEN + ASSIGNEE_LEN];
    k[..ID_LEN].copy_from_slice(page.as_bytes());
    k[ID_LEN..].copy_from_slice(&assignee_key(assignee));
    k
}

/// Decode a bare 16-byte id
#[inline]
pub fn id_from(bytes: &[u8]) -> Option<Uuid> {
    Uuid::from_slice(bytes).ok()
}

/// Second id of a pair key
#[inline]
pub fn pair_suffix(key: &[u8]) -> Option<Uuid> {
    if key.len() != 2 * ID_LEN {
        return None;
    }
    id_from(&key[ID_LEN..])
}

// ============================================================================
// Tests
// ============================================================================
