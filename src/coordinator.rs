//! Tree mutation coordinator.
//!
//! Every structural operation runs as one write transaction: validation
//! first, then the page writes, then a cascade re-resolving the affected
//! subtree. Nothing is published until the transaction has committed.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use heed::RoTxn;

use crate::broadcast::{Broadcaster, ChangeEvent, ChangeKind, NoopBroadcaster};
use crate::bundle::{self, ImportOptions, ImportResult};
use crate::cascade::{cascade, inherited_view};
use crate::config::{Config, EngineConfig};
use crate::context::{Actor, OpContext};
use crate::db::{Dbs, Store};
use crate::error::{Error, Result};
use crate::guard;
use crate::model::*;
use crate::read::{is_within, live_ancestors, subtree, subtree_height};
use crate::resolver::{resolve, Target};
use crate::tx::Tx;
use crate::verify::{verify_space, Violation};

/// What a committed transaction changed
#[derive(Debug, Default)]
pub(crate) struct Delta {
    pub meta: Vec<Page>,
    pub deleted: Vec<PageId>,
}

/// The page tree engine over one store
pub struct PageTree {
    store: Store,
    config: EngineConfig,
    broadcaster: Arc<dyn Broadcaster>,
}

impl PageTree {
    pub fn open(config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(PageTree {
            store: Store::open(&config.storage)?,
            config: config.engine.clone(),
            broadcaster: Arc::new(NoopBroadcaster),
        })
    }

    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn Broadcaster>) -> Self {
        self.broadcaster = broadcaster;
        self
    }

    /// Fresh context bounded by the configured transaction timeout
    pub fn context(&self) -> OpContext {
        OpContext::with_timeout(self.config.tx_timeout())
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub(crate) fn max_depth(&self) -> usize {
        self.config.max_tree_depth
    }

    pub fn revision(&self) -> Result<u64> {
        self.store.read(|dbs, tx| dbs.revision(tx))
    }

    /// Run `f` in one write transaction, bump the revision and publish the delta.
    pub(crate) fn commit<T, F>(&self, ctx: &OpContext, space: SpaceId, op: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Tx<'_>, &mut Delta) -> Result<T>,
    {
        let (value, delta, permissions, revision) = self.store.transact(ctx, |tx| {
            let mut delta = Delta::default();
            let value = f(tx, &mut delta)?;
            let permissions = tx.touched_pages();
            let revision = tx.bump_revision()?;
            Ok((value, delta, permissions, revision))
        })?;
        tracing::info!(
            op,
            space_id = %space,
            revision,
            pages = delta.meta.len(),
            deleted = delta.deleted.len(),
            permission_pages = permissions.len(),
            "committed"
        );
        self.publish(space, revision, delta, permissions);
        Ok(value)
    }

    /// `commit` on behalf of an actor of the space. Guests only read.
    pub(crate) fn commit_as<T, F>(&self, ctx: &OpContext, actor: &Actor, op: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Tx<'_>, &mut Delta) -> Result<T>,
    {
        guard::check_actor(actor)?;
        self.commit(ctx, actor.space_id, op, f)
    }

    fn publish(&self, space_id: SpaceId, revision: u64, delta: Delta, permissions: Vec<PageId>) {
        let gone: HashSet<PageId> = delta.deleted.iter().copied().collect();
        let mut kinds = Vec::new();
        if !delta.meta.is_empty() {
            kinds.push(ChangeKind::PagesMetaUpdated { pages: delta.meta });
        }
        if !delta.deleted.is_empty() {
            kinds.push(ChangeKind::PagesDeleted { page_ids: delta.deleted });
        }
        let page_ids: Vec<PageId> = permissions.into_iter().filter(|id| !gone.contains(id)).collect();
        if !page_ids.is_empty() {
            kinds.push(ChangeKind::PermissionsChanged { page_ids });
        }
        for kind in kinds {
            self.broadcaster.publish(&ChangeEvent { space_id, revision, kind });
        }
    }

    // ------------------------------------------------------------------
    // Structural operations
    // ------------------------------------------------------------------

    /// Create a page with its local entries and everything it inherits
    pub fn create_page(&self, ctx: &OpContext, actor: &Actor, input: NewPage) -> Result<PageWithPermissions> {
        if input.space_id != actor.space_id {
            return Err(Error::not_found("space", input.space_id));
        }
        let max_depth = self.max_depth();
        let created = self.commit_as(ctx, actor, "create_page", |tx, delta| {
            let space = tx
                .space(&input.space_id)?
                .ok_or_else(|| Error::not_found("space", input.space_id))?;
            if let Some(parent_id) = input.parent_id {
                let parent = live_page(tx, actor, &parent_id)?;
                if live_ancestors(tx.dbs(), tx.ro(), &parent, max_depth)?.len() + 1 >= max_depth {
                    return Err(Error::InvalidState(format!("page {parent_id} is at the maximum tree depth")));
                }
            }
            let mut seen = HashSet::new();
            for p in &input.permissions {
                if !seen.insert(p.assignee) {
                    return Err(Error::InvalidInput(format!("duplicate entry for {}", p.assignee)));
                }
                guard::validate_grant(tx, &space.id, &p.assignee, p.level)?;
            }

            let id = new_id()?;
            let mut page = Page {
                id,
                space_id: space.id,
                parent_id: input.parent_id,
                index: 0,
                page_type: input.page_type,
                title: input.title.clone(),
                path: page_path(&id),
                content_id: input.content_id,
                created_by: input.created_by,
                deleted_at: None,
            };
            let shifted = place(tx, &mut page, input.index)?;
            tx.put_page(&page)?;

            let mut locals = match page.parent_id {
                None => root_defaults(tx, &space, input.created_by)?,
                Some(_) => BTreeMap::new(),
            };
            for p in &input.permissions {
                locals.insert(p.assignee, p.level);
            }
            for (assignee, level) in locals {
                tx.create_permission(&page, assignee, level, None, None)?;
            }
            cascade(tx, &page, max_depth)?;

            delta.meta.push(page.clone());
            delta.meta.extend(shifted);
            Ok(PageWithPermissions { permissions: tx.list_for_page(&page.id)?, page })
        })?;
        tracing::info!(
            page_id = %created.page.id,
            parent_id = ?created.page.parent_id,
            permissions = created.permissions.len(),
            "page created"
        );
        Ok(created)
    }

    /// Move a page (and its subtree) under `new_parent`, or make it a root.
    ///
    /// Without `index` the page is appended after its new siblings.
    pub fn reposition_page(
        &self,
        ctx: &OpContext,
        actor: &Actor,
        page_id: PageId,
        new_parent: Option<PageId>,
        index: Option<u32>,
    ) -> Result<Page> {
        let max_depth = self.max_depth();
        let moved = self.commit_as(ctx, actor, "reposition_page", |tx, delta| {
            let mut page = live_page(tx, actor, &page_id)?;
            if let Some(target) = new_parent {
                if target == page_id {
                    return Err(Error::UndesirableOperation(format!("page {page_id} cannot be its own parent")));
                }
                let parent = live_page(tx, actor, &target)?;
                tx.check()?;
                if is_within(tx.dbs(), tx.ro(), &parent.id, &page_id, max_depth)? {
                    return Err(Error::UndesirableOperation(format!(
                        "page {page_id} cannot move under its own descendant {target}"
                    )));
                }
                // Ancestors the deepest moved page would end up with
                let deepest = live_ancestors(tx.dbs(), tx.ro(), &parent, max_depth)?.len()
                    + 1
                    + subtree_height(tx.dbs(), tx.ro(), &page)?;
                if deepest >= max_depth {
                    return Err(Error::InvalidState(format!(
                        "moving page {page_id} under {target} exceeds the maximum tree depth"
                    )));
                }
            }

            let reparented = page.parent_id != new_parent;
            page.parent_id = new_parent;
            let shifted = place(tx, &mut page, index)?;
            tx.put_page(&page)?;
            if reparented {
                let stats = cascade(tx, &page, max_depth)?;
                tracing::info!(
                    page_id = %page.id,
                    pages = stats.pages,
                    relinked = stats.relinked,
                    detached = stats.detached,
                    "subtree re-resolved after move"
                );
            }
            delta.meta.push(page.clone());
            delta.meta.extend(shifted);
            Ok(page)
        })?;
        Ok(moved)
    }

    /// Copy a subtree under `target_parent` with fresh ids
    pub fn duplicate_subtree(
        &self,
        ctx: &OpContext,
        actor: &Actor,
        page_id: PageId,
        target_parent: Option<PageId>,
    ) -> Result<ImportResult> {
        let max_depth = self.max_depth();
        let result = self.commit_as(ctx, actor, "duplicate_subtree", |tx, delta| {
            tx.check()?;
            let bundle = bundle::export_from(tx.dbs(), tx.ro(), &actor.space_id, &[page_id], max_depth)?;
            let options = ImportOptions { reset_paths: true, include_permissions: true };
            let result = bundle::import_into(tx, actor, &bundle, target_parent, &options, max_depth)?;
            delta.meta.extend(result.pages.iter().cloned());
            Ok(result)
        })?;
        tracing::info!(source = %page_id, pages = result.pages.len(), "subtree duplicated");
        Ok(result)
    }

    /// Soft-delete a page and its live subtree
    pub fn trash_page(&self, ctx: &OpContext, actor: &Actor, page_id: PageId) -> Result<Vec<PageId>> {
        self.commit_as(ctx, actor, "trash_page", |tx, delta| {
            let page = live_page(tx, actor, &page_id)?;
            tx.check()?;
            let now = Utc::now();
            for mut p in subtree(tx.dbs(), tx.ro(), &page, false)? {
                p.deleted_at = Some(now);
                tx.put_page(&p)?;
                delta.deleted.push(p.id);
            }
            Ok(delta.deleted.clone())
        })
    }

    /// Undo `trash_page`. The parent must be live.
    pub fn restore_page(&self, ctx: &OpContext, actor: &Actor, page_id: PageId) -> Result<Page> {
        let max_depth = self.max_depth();
        self.commit_as(ctx, actor, "restore_page", |tx, delta| {
            let page = scoped_page(tx, actor, &page_id)?;
            if page.is_live() {
                return Ok(page);
            }
            if let Some(parent_id) = page.parent_id {
                if !tx.page(&parent_id)?.is_some_and(|p| p.is_live()) {
                    return Err(Error::DataNotFound(format!("parent page {parent_id} is in the trash")));
                }
            }
            tx.check()?;
            for mut p in subtree(tx.dbs(), tx.ro(), &page, true)? {
                p.deleted_at = None;
                tx.put_page(&p)?;
                delta.meta.push(p);
            }
            let page = scoped_page(tx, actor, &page_id)?;
            cascade(tx, &page, max_depth)?;
            Ok(page)
        })
    }

    /// Hard-delete a page, its subtree and every entry they own
    pub fn delete_page(&self, ctx: &OpContext, actor: &Actor, page_id: PageId) -> Result<Vec<PageId>> {
        self.commit_as(ctx, actor, "delete_page", |tx, delta| {
            let page = scoped_page(tx, actor, &page_id)?;
            tx.check()?;
            let pages = subtree(tx.dbs(), tx.ro(), &page, true)?;
            for p in &pages {
                for entry in tx.list_for_page(&p.id)? {
                    for inheritor in tx.list_inheriting_from(&entry.id)? {
                        tx.delete_permission(&inheritor.id)?;
                    }
                }
            }
            for p in pages.iter().rev() {
                tx.delete_page(&p.id)?;
                delta.deleted.push(p.id);
            }
            Ok(delta.deleted.clone())
        })
    }

    // ------------------------------------------------------------------
    // Permission operations
    // ------------------------------------------------------------------

    /// Set the level of `assignee` on a page, then re-resolve its subtree
    pub fn upsert_permission(
        &self,
        ctx: &OpContext,
        actor: &Actor,
        page_id: PageId,
        assignee: PermissionAssignee,
        level: PermissionLevel,
    ) -> Result<PermissionEntry> {
        let max_depth = self.max_depth();
        let entry = self.commit_as(ctx, actor, "upsert_permission", |tx, _| {
            let page = live_page(tx, actor, &page_id)?;
            guard::validate_grant(tx, &page.space_id, &assignee, level)?;
            let existing = tx.permission_for_assignee(&page.id, &assignee)?;
            if let Some(entry) = &existing {
                guard::check_generic_write(entry)?;
            }

            // Same grant as the parent: keep it inherited
            let (parent, _) = inherited_view(tx, &page, max_depth)?;
            let link = match parent.iter().find(|p| p.assignee == assignee && p.level == level) {
                Some(p) => (Some(p.origin()), p.source.clone()),
                None => (None, None),
            };
            write_entry(tx, &page, existing, assignee, level, link, max_depth)
        })?;
        tracing::info!(page_id = %page_id, permission_id = %entry.id, assignee = %entry.assignee, level = %entry.level, "permission upserted");
        Ok(entry)
    }

    /// Upsert path for an integration: the entry becomes locally defined on
    /// the page and managed by `source`
    pub fn upsert_sourced_permission(
        &self,
        ctx: &OpContext,
        actor: &Actor,
        page_id: PageId,
        assignee: PermissionAssignee,
        level: PermissionLevel,
        source: &str,
    ) -> Result<PermissionEntry> {
        let max_depth = self.max_depth();
        let entry = self.commit_as(ctx, actor, "upsert_sourced_permission", |tx, _| {
            let page = live_page(tx, actor, &page_id)?;
            guard::validate_grant(tx, &page.space_id, &assignee, level)?;
            let existing = tx.permission_for_assignee(&page.id, &assignee)?;
            if let Some(entry) = &existing {
                guard::check_sourced_write(entry, source)?;
            }
            write_entry(tx, &page, existing, assignee, level, (None, Some(source.to_string())), max_depth)
        })?;
        tracing::info!(page_id = %page_id, permission_id = %entry.id, source, level = %entry.level, "sourced permission upserted");
        Ok(entry)
    }

    /// Remove a locally-defined entry and everything inheriting from it
    pub fn remove_permission(&self, ctx: &OpContext, actor: &Actor, permission_id: PermissionId) -> Result<()> {
        let max_depth = self.max_depth();
        self.commit_as(ctx, actor, "remove_permission", |tx, _| {
            let entry = scoped_permission(tx, actor, &permission_id)?;
            guard::check_removable(&entry)?;
            remove_local(tx, &entry, max_depth)
        })
    }

    /// Removal path for the integration that owns `source`
    pub fn remove_sourced_permission(
        &self,
        ctx: &OpContext,
        actor: &Actor,
        permission_id: PermissionId,
        source: &str,
    ) -> Result<()> {
        let max_depth = self.max_depth();
        self.commit_as(ctx, actor, "remove_sourced_permission", |tx, _| {
            let entry = scoped_permission(tx, actor, &permission_id)?;
            guard::check_sourced_removal(&entry, source)?;
            remove_local(tx, &entry, max_depth)
        })
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Any page of the actor's space, trashed ones included
    pub fn get_page(&self, actor: &Actor, page_id: PageId) -> Result<Page> {
        self.store.read(|dbs, tx| read_page(dbs, tx, actor, &page_id))
    }

    pub fn page_with_permissions(&self, actor: &Actor, page_id: PageId) -> Result<PageWithPermissions> {
        self.store.read(|dbs, tx| {
            let page = read_page(dbs, tx, actor, &page_id)?;
            Ok(PageWithPermissions { permissions: dbs.permissions_for_page(tx, &page.id)?, page })
        })
    }

    /// Live children ordered by index
    pub fn list_children(&self, actor: &Actor, page_id: PageId) -> Result<Vec<Page>> {
        self.store.read(|dbs, tx| {
            let page = read_page(dbs, tx, actor, &page_id)?;
            Ok(dbs.children(tx, &page.id)?.into_iter().filter(Page::is_live).collect())
        })
    }

    /// Live top-level pages of the actor's space
    pub fn list_root_pages(&self, actor: &Actor) -> Result<Vec<Page>> {
        self.store.read(|dbs, tx| {
            Ok(dbs.roots(tx, &actor.space_id)?.into_iter().filter(Page::is_live).collect())
        })
    }

    pub fn list_permissions(&self, actor: &Actor, page_id: PageId) -> Result<Vec<PermissionEntry>> {
        self.store.read(|dbs, tx| {
            let page = read_page(dbs, tx, actor, &page_id)?;
            dbs.permissions_for_page(tx, &page.id)
        })
    }

    /// Target set of a page computed from its parent's stored entries, without writing
    pub fn resolved_permissions(&self, actor: &Actor, page_id: PageId) -> Result<Vec<Target>> {
        let max_depth = self.max_depth();
        self.store.read(|dbs, tx| {
            let page = read_page(dbs, tx, actor, &page_id)?;
            let parent = match live_ancestors(dbs, tx, &page, max_depth)?.first() {
                Some(p) => dbs.permissions_for_page(tx, &p.id)?,
                None => Vec::new(),
            };
            Ok(resolve(&parent, &dbs.permissions_for_page(tx, &page.id)?))
        })
    }

    /// Invariant violations across the actor's space. Empty when consistent.
    pub fn verify_tree(&self, actor: &Actor) -> Result<Vec<Violation>> {
        let max_depth = self.max_depth();
        self.store.read(|dbs, tx| verify_space(dbs, tx, &actor.space_id, max_depth))
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// A page of the actor's space; other spaces read as missing
pub(crate) fn scoped_page(tx: &Tx<'_>, actor: &Actor, id: &PageId) -> Result<Page> {
    match tx.page(id)? {
        Some(page) if page.space_id == actor.space_id => Ok(page),
        _ => Err(Error::not_found("page", id)),
    }
}

pub(crate) fn live_page(tx: &Tx<'_>, actor: &Actor, id: &PageId) -> Result<Page> {
    let page = scoped_page(tx, actor, id)?;
    if !page.is_live() {
        return Err(Error::not_found("page", id));
    }
    Ok(page)
}

fn read_page(dbs: &Dbs, tx: &RoTxn, actor: &Actor, id: &PageId) -> Result<Page> {
    match dbs.page(tx, id)? {
        Some(page) if page.space_id == actor.space_id => Ok(page),
        _ => Err(Error::not_found("page", id)),
    }
}

fn scoped_permission(tx: &Tx<'_>, actor: &Actor, id: &PermissionId) -> Result<PermissionEntry> {
    match tx.permission(id)? {
        Some(entry) if entry.space_id == actor.space_id => Ok(entry),
        _ => Err(Error::not_found("permission", id)),
    }
}

/// Set `page.index` among its siblings, shifting later siblings when inserting.
/// Returns the shifted siblings.
pub(crate) fn place(tx: &mut Tx<'_>, page: &mut Page, index: Option<u32>) -> Result<Vec<Page>> {
    let siblings: Vec<Page> = match page.parent_id {
        Some(parent) => tx.children(&parent)?,
        None => tx.roots(&page.space_id)?,
    }
    .into_iter()
    .filter(|s| s.id != page.id)
    .collect();

    let Some(index) = index else {
        page.index = siblings.iter().map(|s| s.index.saturating_add(1)).max().unwrap_or(0);
        return Ok(Vec::new());
    };
    page.index = index;
    let mut shifted = Vec::new();
    for mut sibling in siblings.into_iter().filter(|s| s.index >= index) {
        sibling.index = sibling.index.saturating_add(1);
        tx.put_page(&sibling)?;
        shifted.push(sibling);
    }
    Ok(shifted)
}

/// Local entries every new root page of `space` starts with
fn root_defaults(
    tx: &Tx<'_>,
    space: &Space,
    created_by: Option<UserId>,
) -> Result<BTreeMap<PermissionAssignee, PermissionLevel>> {
    let mut r = BTreeMap::new();
    if let Some(level) = space.default_page_permission {
        r.insert(PermissionAssignee::Space { id: space.id }, level);
    }
    if space.default_public_pages {
        r.insert(PermissionAssignee::Public, PermissionLevel::View);
    }
    if let Some(user) = created_by {
        let creator = PermissionAssignee::User { id: user };
        guard::validate_grant(tx, &space.id, &creator, PermissionLevel::FullAccess)?;
        r.insert(creator, PermissionLevel::FullAccess);
    }
    Ok(r)
}

/// Create or rewrite the entry of `assignee` on `page`, then cascade
fn write_entry(
    tx: &mut Tx<'_>,
    page: &Page,
    existing: Option<PermissionEntry>,
    assignee: PermissionAssignee,
    level: PermissionLevel,
    (from, source): (Option<PermissionId>, Option<String>),
    max_depth: usize,
) -> Result<PermissionEntry> {
    let entry = match existing {
        Some(entry) => {
            tx.update_permission(&entry.id, level)?;
            tx.relink_permission(&entry.id, from)?;
            tx.set_permission_source(&entry.id, source)?
        }
        None => tx.create_permission(page, assignee, level, from, source)?,
    };
    cascade(tx, page, max_depth)?;
    tx.permission(&entry.id)?
        .ok_or_else(|| Error::Internal(format!("permission {} vanished during cascade", entry.id)))
}

fn remove_local(tx: &mut Tx<'_>, entry: &PermissionEntry, max_depth: usize) -> Result<()> {
    let inheritors = tx.list_inheriting_from(&entry.id)?;
    for inheritor in &inheritors {
        tx.delete_permission(&inheritor.id)?;
    }
    tx.delete_permission(&entry.id)?;
    let page = tx
        .page(&entry.page_id)?
        .ok_or_else(|| Error::Internal(format!("permission {} has no page", entry.id)))?;
    if page.is_live() {
        cascade(tx, &page, max_depth)?;
    }
    tracing::info!(permission_id = %entry.id, page_id = %page.id, inheritors = inheritors.len(), "permission removed");
    Ok(())
}
