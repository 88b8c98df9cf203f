//! Transaction wrapper: the permission record store and page row writes.
//!
//! Every call checks the operation context first, so a deadline or a
//! cancellation observed between two store calls fails the transaction.
//! The store does not decide policy: it persists what it is told and only
//! enforces row-level constraints (one entry per assignee per page).

use std::collections::BTreeSet;

use heed::{RoTxn, RwTxn};

use crate::constants::REVISION_KEY;
use crate::context::OpContext;
use crate::db::Dbs;
use crate::error::{Error, Result};
use crate::keys::{page_assignee, pair};
use crate::model::*;

/// Transaction wrapper for batched writes
pub struct Tx<'s> {
    txn: RwTxn<'s>,
    dbs: &'s Dbs,
    ctx: OpContext,
    touched: BTreeSet<PageId>,
}

impl<'s> Tx<'s> {
    pub(crate) fn new(txn: RwTxn<'s>, dbs: &'s Dbs, ctx: OpContext) -> Self {
        Tx { txn, dbs, ctx, touched: BTreeSet::new() }
    }

    pub(crate) fn commit(self) -> Result<()> {
        self.ctx.check()?;
        self.txn.commit()?;
        Ok(())
    }

    #[inline]
    pub fn check(&self) -> Result<()> {
        self.ctx.check()
    }

    #[inline]
    pub fn dbs(&self) -> &'s Dbs {
        self.dbs
    }

    /// Read view of the pending transaction
    #[inline]
    pub fn ro(&self) -> &RoTxn<'s> {
        &self.txn
    }

    /// Pages whose permission rows were written so far
    pub fn touched_pages(&self) -> Vec<PageId> {
        self.touched.iter().copied().collect()
    }

    /// Bump and return the committed revision counter
    pub fn bump_revision(&mut self) -> Result<u64> {
        self.check()?;
        let next = self.dbs.revision(&self.txn)? + 1;
        self.dbs.meta.put(&mut self.txn, REVISION_KEY, &next)?;
        Ok(next)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn page(&self, id: &PageId) -> Result<Option<Page>> {
        self.check()?;
        self.dbs.page(&self.txn, id)
    }

    pub fn children(&self, id: &PageId) -> Result<Vec<Page>> {
        self.check()?;
        self.dbs.children(&self.txn, id)
    }

    pub fn roots(&self, space: &SpaceId) -> Result<Vec<Page>> {
        self.check()?;
        self.dbs.roots(&self.txn, space)
    }

    pub fn permission(&self, id: &PermissionId) -> Result<Option<PermissionEntry>> {
        self.check()?;
        self.dbs.permission(&self.txn, id)
    }

    pub fn list_for_page(&self, page: &PageId) -> Result<Vec<PermissionEntry>> {
        self.check()?;
        self.dbs.permissions_for_page(&self.txn, page)
    }

    pub fn list_inheriting_from(&self, origin: &PermissionId) -> Result<Vec<PermissionEntry>> {
        self.check()?;
        self.dbs.inheriting_from(&self.txn, origin)
    }

    pub fn permission_for_assignee(
        &self,
        page: &PageId,
        assignee: &PermissionAssignee,
    ) -> Result<Option<PermissionEntry>> {
        self.check()?;
        self.dbs.permission_for_assignee(&self.txn, page, assignee)
    }

    pub fn space(&self, id: &SpaceId) -> Result<Option<Space>> {
        self.check()?;
        self.dbs.space(&self.txn, id)
    }

    pub fn user(&self, id: &UserId) -> Result<Option<User>> {
        self.check()?;
        self.dbs.user(&self.txn, id)
    }

    pub fn role(&self, id: &RoleId) -> Result<Option<Role>> {
        self.check()?;
        self.dbs.role(&self.txn, id)
    }

    pub fn membership(&self, space: &SpaceId, user: &UserId) -> Result<Option<Membership>> {
        self.check()?;
        self.dbs.membership(&self.txn, space, user)
    }

    pub fn role_assignment(&self, role: &RoleId, user: &UserId) -> Result<Option<u64>> {
        self.check()?;
        self.dbs.role_assignment(&self.txn, role, user)
    }

    // ------------------------------------------------------------------
    // Pages
    // ------------------------------------------------------------------

    /// Insert or overwrite a page row, keeping the children index in sync
    pub fn put_page(&mut self, page: &Page) -> Result<()> {
        self.check()?;
        let previous = self.dbs.page(&self.txn, &page.id)?.and_then(|p| p.parent_id);
        if previous != page.parent_id {
            if let Some(old) = previous {
                self.dbs.children.delete(&mut self.txn, &pair(&old, &page.id))?;
            }
            if let Some(new) = page.parent_id {
                self.dbs.children.put(&mut self.txn, &pair(&new, &page.id), &())?;
            }
        }
        self.dbs.pages.put(&mut self.txn, page.id.as_bytes(), page)?;
        Ok(())
    }

    /// Delete a page row and every permission it owns
    pub fn delete_page(&mut self, id: &PageId) -> Result<bool> {
        self.check()?;
        let Some(page) = self.dbs.page(&self.txn, id)? else { return Ok(false) };
        for entry in self.dbs.permissions_for_page(&self.txn, id)? {
            self.delete_permission(&entry.id)?;
        }
        if let Some(parent) = page.parent_id {
            self.dbs.children.delete(&mut self.txn, &pair(&parent, id))?;
        }
        Ok(self.dbs.pages.delete(&mut self.txn, id.as_bytes())?)
    }

    // ------------------------------------------------------------------
    // Permission records
    // ------------------------------------------------------------------

    /// Create an entry on `page`. Fails if the page already has one for the assignee.
    pub fn create_permission(
        &mut self,
        page: &Page,
        assignee: PermissionAssignee,
        level: PermissionLevel,
        inherited_from: Option<PermissionId>,
        source: Option<String>,
    ) -> Result<PermissionEntry> {
        self.check()?;
        let slot = page_assignee(&page.id, &assignee);
        if self.dbs.page_permissions.get(&self.txn, &slot)?.is_some() {
            return Err(Error::Constraint(format!(
                "page {} already has an entry for {assignee}",
                page.id
            )));
        }
        let entry = PermissionEntry {
            id: new_id()?,
            page_id: page.id,
            space_id: page.space_id,
            assignee,
            level,
            inherited_from,
            source,
        };
        self.dbs.permissions.put(&mut self.txn, entry.id.as_bytes(), &entry)?;
        self.dbs.page_permissions.put(&mut self.txn, &slot, entry.id.as_bytes())?;
        if let Some(origin) = entry.inherited_from {
            self.dbs.inheritors.put(&mut self.txn, &pair(&origin, &entry.id), &())?;
        }
        self.touched.insert(page.id);
        Ok(entry)
    }

    pub fn update_permission(&mut self, id: &PermissionId, level: PermissionLevel) -> Result<PermissionEntry> {
        self.check()?;
        let mut entry = self.require_permission(id)?;
        if entry.level != level {
            entry.level = level;
            self.dbs.permissions.put(&mut self.txn, id.as_bytes(), &entry)?;
            self.touched.insert(entry.page_id);
        }
        Ok(entry)
    }

    /// Point an entry at a new origin, or make it locally defined with `None`
    pub fn relink_permission(
        &mut self,
        id: &PermissionId,
        inherited_from: Option<PermissionId>,
    ) -> Result<PermissionEntry> {
        self.check()?;
        let mut entry = self.require_permission(id)?;
        if entry.inherited_from == inherited_from {
            return Ok(entry);
        }
        if inherited_from == Some(*id) {
            return Err(Error::Constraint(format!("permission {id} cannot inherit from itself")));
        }
        if let Some(old) = entry.inherited_from {
            self.dbs.inheritors.delete(&mut self.txn, &pair(&old, id))?;
        }
        if let Some(new) = inherited_from {
            self.dbs.inheritors.put(&mut self.txn, &pair(&new, id), &())?;
        }
        entry.inherited_from = inherited_from;
        self.dbs.permissions.put(&mut self.txn, id.as_bytes(), &entry)?;
        self.touched.insert(entry.page_id);
        Ok(entry)
    }

    pub fn set_permission_source(&mut self, id: &PermissionId, source: Option<String>) -> Result<PermissionEntry> {
        self.check()?;
        let mut entry = self.require_permission(id)?;
        if entry.source != source {
            entry.source = source;
            self.dbs.permissions.put(&mut self.txn, id.as_bytes(), &entry)?;
            self.touched.insert(entry.page_id);
        }
        Ok(entry)
    }

    pub fn delete_permission(&mut self, id: &PermissionId) -> Result<bool> {
        self.check()?;
        let Some(entry) = self.dbs.permission(&self.txn, id)? else { return Ok(false) };
        self.dbs
            .page_permissions
            .delete(&mut self.txn, &page_assignee(&entry.page_id, &entry.assignee))?;
        if let Some(origin) = entry.inherited_from {
            self.dbs.inheritors.delete(&mut self.txn, &pair(&origin, id))?;
        }
        self.dbs.permissions.delete(&mut self.txn, id.as_bytes())?;
        self.touched.insert(entry.page_id);
        Ok(true)
    }

    fn require_permission(&self, id: &PermissionId) -> Result<PermissionEntry> {
        self.dbs
            .permission(&self.txn, id)?
            .ok_or_else(|| Error::not_found("permission", id))
    }

    // ------------------------------------------------------------------
    // Tenant rows
    // ------------------------------------------------------------------

    pub fn put_space(&mut self, space: &Space) -> Result<()> {
        self.check()?;
        Ok(self.dbs.spaces.put(&mut self.txn, space.id.as_bytes(), space)?)
    }

    pub fn put_user(&mut self, user: &User) -> Result<()> {
        self.check()?;
        Ok(self.dbs.users.put(&mut self.txn, user.id.as_bytes(), user)?)
    }

    pub fn put_membership(&mut self, membership: &Membership) -> Result<()> {
        self.check()?;
        let k = pair(&membership.space_id, &membership.user_id);
        Ok(self.dbs.memberships.put(&mut self.txn, &k, membership)?)
    }

    pub fn put_role(&mut self, role: &Role) -> Result<()> {
        self.check()?;
        Ok(self.dbs.roles.put(&mut self.txn, role.id.as_bytes(), role)?)
    }

    pub fn assign_role(&mut self, role: &RoleId, user: &UserId, at_millis: u64) -> Result<()> {
        self.check()?;
        Ok(self.dbs.role_assignments.put(&mut self.txn, &pair(role, user), &at_millis)?)
    }

    pub fn unassign_role(&mut self, role: &RoleId, user: &UserId) -> Result<bool> {
        self.check()?;
        Ok(self.dbs.role_assignments.delete(&mut self.txn, &pair(role, user))?)
    }
}
