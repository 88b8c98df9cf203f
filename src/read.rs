//! Read operations over a snapshot (no policy checks)

use std::collections::{HashSet, VecDeque};

use heed::RoTxn;

use crate::constants::REVISION_KEY;
use crate::db::Dbs;
use crate::error::{Error, Result};
use crate::keys::{id_from, page_assignee, pair, pair_suffix, prefix};
use crate::model::*;

impl Dbs {
    pub fn page(&self, tx: &RoTxn, id: &PageId) -> Result<Option<Page>> {
        Ok(self.pages.get(tx, id.as_bytes())?)
    }

    pub fn child_ids(&self, tx: &RoTxn, parent: &PageId) -> Result<Vec<PageId>> {
        let pfx = prefix(parent);
        let mut r = Vec::new();
        for item in self.children.prefix_iter(tx, &pfx)? {
            let (k, _) = item?;
            if let Some(id) = pair_suffix(k) {
                r.push(id);
            }
        }
        Ok(r)
    }

    /// Children ordered by `index`, trashed ones included
    pub fn children(&self, tx: &RoTxn, parent: &PageId) -> Result<Vec<Page>> {
        let mut r = Vec::new();
        for id in self.child_ids(tx, parent)? {
            if let Some(page) = self.page(tx, &id)? {
                r.push(page);
            }
        }
        r.sort_by(|a, b| a.index.cmp(&b.index).then(a.id.cmp(&b.id)));
        Ok(r)
    }

    pub fn pages_in_space(&self, tx: &RoTxn, space: &SpaceId) -> Result<Vec<Page>> {
        let mut r = Vec::new();
        for item in self.pages.iter(tx)? {
            let (_, page) = item?;
            if page.space_id == *space {
                r.push(page);
            }
        }
        Ok(r)
    }

    /// Top-level pages of a space ordered by `index`, trashed ones included
    pub fn roots(&self, tx: &RoTxn, space: &SpaceId) -> Result<Vec<Page>> {
        let mut r: Vec<Page> = self
            .pages_in_space(tx, space)?
            .into_iter()
            .filter(|p| p.parent_id.is_none())
            .collect();
        r.sort_by(|a, b| a.index.cmp(&b.index).then(a.id.cmp(&b.id)));
        Ok(r)
    }

    pub fn roles_in_space(&self, tx: &RoTxn, space: &SpaceId) -> Result<Vec<Role>> {
        let mut r = Vec::new();
        for item in self.roles.iter(tx)? {
            let (_, role) = item?;
            if role.space_id == *space {
                r.push(role);
            }
        }
        Ok(r)
    }

    pub fn permission(&self, tx: &RoTxn, id: &PermissionId) -> Result<Option<PermissionEntry>> {
        Ok(self.permissions.get(tx, id.as_bytes())?)
    }

    /// All entries owned by a page, ordered by assignee key
    pub fn permissions_for_page(&self, tx: &RoTxn, page: &PageId) -> Result<Vec<PermissionEntry>> {
        let pfx = prefix(page);
        let mut ids = Vec::new();
        for item in self.page_permissions.prefix_iter(tx, &pfx)? {
            let (_, v) = item?;
            if let Some(id) = id_from(v) {
                ids.push(id);
            }
        }
        let mut r = Vec::with_capacity(ids.len());
        for id in ids {
            match self.permission(tx, &id)? {
                Some(entry) => r.push(entry),
                None => return Err(Error::Internal(format!("index points at missing permission {id}"))),
            }
        }
        Ok(r)
    }

    pub fn permission_for_assignee(
        &self,
        tx: &RoTxn,
        page: &PageId,
        assignee: &PermissionAssignee,
    ) -> Result<Option<PermissionEntry>> {
        match self.page_permissions.get(tx, &page_assignee(page, assignee))? {
            Some(v) => match id_from(v) {
                Some(id) => self.permission(tx, &id),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    /// Entries whose `inherited_from` is `origin`
    pub fn inheriting_from(&self, tx: &RoTxn, origin: &PermissionId) -> Result<Vec<PermissionEntry>> {
        let pfx = prefix(origin);
        let mut ids = Vec::new();
        for item in self.inheritors.prefix_iter(tx, &pfx)? {
            let (k, _) = item?;
            if let Some(id) = pair_suffix(k) {
                ids.push(id);
            }
        }
        let mut r = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entry) = self.permission(tx, &id)? {
                r.push(entry);
            }
        }
        Ok(r)
    }

    pub fn space(&self, tx: &RoTxn, id: &SpaceId) -> Result<Option<Space>> {
        Ok(self.spaces.get(tx, id.as_bytes())?)
    }

    pub fn user(&self, tx: &RoTxn, id: &UserId) -> Result<Option<User>> {
        Ok(self.users.get(tx, id.as_bytes())?)
    }

    pub fn role(&self, tx: &RoTxn, id: &RoleId) -> Result<Option<Role>> {
        Ok(self.roles.get(tx, id.as_bytes())?)
    }

    pub fn membership(&self, tx: &RoTxn, space: &SpaceId, user: &UserId) -> Result<Option<Membership>> {
        Ok(self.memberships.get(tx, &pair(space, user))?)
    }

    /// When the role was assigned to the user, if it is
    pub fn role_assignment(&self, tx: &RoTxn, role: &RoleId, user: &UserId) -> Result<Option<u64>> {
        Ok(self.role_assignments.get(tx, &pair(role, user))?)
    }

    pub fn role_members(&self, tx: &RoTxn, role: &RoleId) -> Result<Vec<UserId>> {
        let pfx = prefix(role);
        let mut r = Vec::new();
        for item in self.role_assignments.prefix_iter(tx, &pfx)? {
            let (k, _) = item?;
            if let Some(id) = pair_suffix(k) {
                r.push(id);
            }
        }
        Ok(r)
    }

    pub fn revision(&self, tx: &RoTxn) -> Result<u64> {
        Ok(self.meta.get(tx, REVISION_KEY)?.unwrap_or(0))
    }
}

// ============================================================================
// Tree walks
// ============================================================================

/// Live ancestors of `page`, nearest first. Trashed ancestors are skipped.
///
/// Fails when `page` sits more than `max_depth` levels deep, counting
/// trashed ancestors.
pub fn live_ancestors(dbs: &Dbs, tx: &RoTxn, page: &Page, max_depth: usize) -> Result<Vec<Page>> {
    let mut r = Vec::new();
    let mut cur = page.parent_id;
    for _ in 0..max_depth {
        let Some(id) = cur else { return Ok(r) };
        let parent = dbs
            .page(tx, &id)?
            .ok_or_else(|| Error::Internal(format!("page {} has missing parent {id}", page.id)))?;
        cur = parent.parent_id;
        if parent.is_live() {
            r.push(parent);
        }
    }
    Err(Error::InvalidState(format!("page {} exceeds the maximum tree depth", page.id)))
}

/// True when `candidate` is `root` or lies anywhere beneath it
pub fn is_within(dbs: &Dbs, tx: &RoTxn, candidate: &PageId, root: &PageId, max_depth: usize) -> Result<bool> {
    let mut cur = Some(*candidate);
    for _ in 0..=max_depth {
        match cur {
            Some(id) if id == *root => return Ok(true),
            Some(id) => cur = dbs.page(tx, &id)?.and_then(|p| p.parent_id),
            None => return Ok(false),
        }
    }
    Err(Error::InvalidState(format!("page {candidate} exceeds the maximum tree depth")))
}

/// Levels of live descendants below `root`; 0 for a leaf
pub fn subtree_height(dbs: &Dbs, tx: &RoTxn, root: &Page) -> Result<usize> {
    let mut height = 0;
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([(root.id, 0)]);
    while let Some((id, level)) = queue.pop_front() {
        if !seen.insert(id) {
            return Err(Error::InvalidState(format!("cycle detected at page {id}")));
        }
        height = height.max(level);
        for child in dbs.children(tx, &id)? {
            if child.is_live() {
                queue.push_back((child.id, level + 1));
            }
        }
    }
    Ok(height)
}

/// `root` and its descendants in breadth-first order.
///
/// With `include_trashed = false`, trashed pages and everything under them
/// are left out.
pub fn subtree(dbs: &Dbs, tx: &RoTxn, root: &Page, include_trashed: bool) -> Result<Vec<Page>> {
    let mut r = Vec::new();
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([root.clone()]);
    while let Some(page) = queue.pop_front() {
        if !seen.insert(page.id) {
            return Err(Error::InvalidState(format!("cycle detected at page {}", page.id)));
        }
        for child in dbs.children(tx, &page.id)? {
            if include_trashed || child.is_live() {
                queue.push_back(child);
            }
        }
        r.push(page);
    }
    Ok(r)
}
