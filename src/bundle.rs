//! Subtree export and import.
//!
//! A bundle refers to pages and entries by position, never by id, so it
//! can be re-materialized anywhere. Pages are stored parents first and
//! entries in page order, so every reference points backwards.

use std::collections::{BTreeMap, HashMap};

use heed::RoTxn;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cascade::cascade;
use crate::context::{Actor, OpContext};
use crate::coordinator::{live_page, place, PageTree};
use crate::db::Dbs;
use crate::error::{Error, Result};
use crate::model::*;
use crate::read::{is_within, subtree};
use crate::tx::Tx;

/// Where an exported entry got its grant from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InheritanceRef {
    Local,
    /// Inherited from the entry at this position of the bundle
    Internal { permission_ref: usize },
    /// Inherited from an ancestor outside the bundle
    External,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedPage {
    pub source_id: PageId,
    /// Position of the parent in the bundle; `None` for bundle roots
    pub parent_ref: Option<usize>,
    pub index: u32,
    #[serde(rename = "type")]
    pub page_type: PageType,
    pub title: String,
    pub path: String,
    #[serde(default)]
    pub content_id: Option<Uuid>,
    #[serde(default)]
    pub created_by: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedPermission {
    pub page_ref: usize,
    pub assignee: PermissionAssignee,
    pub level: PermissionLevel,
    pub inheritance: InheritanceRef,
    #[serde(default)]
    pub source: Option<String>,
}

/// Body document referenced by an exported page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockReference {
    pub page_ref: usize,
    pub content_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportBundle {
    pub space_id: SpaceId,
    pub pages: Vec<ExportedPage>,
    pub permissions: Vec<ExportedPermission>,
    #[serde(default)]
    pub block_references: Vec<BlockReference>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportOptions {
    /// Regenerate page paths from the new ids
    #[serde(default)]
    pub reset_paths: bool,
    #[serde(default = "yes")]
    pub include_permissions: bool,
}

fn yes() -> bool {
    true
}

impl Default for ImportOptions {
    fn default() -> Self {
        ImportOptions { reset_paths: false, include_permissions: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportResult {
    pub pages: Vec<Page>,
    pub root_page_ids: Vec<PageId>,
    /// Exported page id -> created page id
    pub page_id_map: BTreeMap<PageId, PageId>,
}

impl ExportBundle {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let bundle: ExportBundle = serde_json::from_str(json)?;
        bundle.check()?;
        Ok(bundle)
    }

    /// Positions of the pages with no parent inside the bundle
    pub(crate) fn root_refs(&self) -> impl Iterator<Item = usize> + '_ {
        self.pages
            .iter()
            .enumerate()
            .filter(|(_, p)| p.parent_ref.is_none())
            .map(|(i, _)| i)
    }

    /// Structural validity: every reference points at an earlier item
    pub fn check(&self) -> Result<()> {
        if self.pages.is_empty() {
            return Err(Error::InvalidInput("bundle has no pages".into()));
        }
        for (i, page) in self.pages.iter().enumerate() {
            if page.parent_ref.is_some_and(|r| r >= i) {
                return Err(Error::InvalidInput(format!("page {i} references a later parent")));
            }
        }
        for (i, entry) in self.permissions.iter().enumerate() {
            if entry.page_ref >= self.pages.len() {
                return Err(Error::InvalidInput(format!("permission {i} references a missing page")));
            }
            if !entry.assignee.allows(entry.level) {
                return Err(Error::InvalidInput(format!("permission {i}: {} is limited to view", entry.assignee)));
            }
            if let InheritanceRef::Internal { permission_ref } = entry.inheritance {
                if permission_ref >= i {
                    return Err(Error::InvalidInput(format!("permission {i} inherits from a later entry")));
                }
            }
        }
        if let Some(block) = self.block_references.iter().find(|b| b.page_ref >= self.pages.len()) {
            return Err(Error::InvalidInput(format!("block {} references a missing page", block.content_id)));
        }
        Ok(())
    }
}

// ============================================================================
// Export
// ============================================================================

/// Bundle the live subtrees under `roots`. Roots nested in another root are folded in.
pub(crate) fn export_from(
    dbs: &Dbs,
    tx: &RoTxn,
    space: &SpaceId,
    roots: &[PageId],
    max_depth: usize,
) -> Result<ExportBundle> {
    if roots.is_empty() {
        return Err(Error::InvalidInput("nothing to export".into()));
    }
    let mut tops = Vec::new();
    for id in roots {
        match dbs.page(tx, id)? {
            Some(page) if page.space_id == *space && page.is_live() => tops.push(page),
            _ => return Err(Error::not_found("page", id)),
        }
    }
    let mut outer = Vec::new();
    for page in &tops {
        let mut nested = false;
        for other in &tops {
            if other.id != page.id && is_within(dbs, tx, &page.id, &other.id, max_depth)? {
                nested = true;
                break;
            }
        }
        if !nested && !outer.iter().any(|p: &Page| p.id == page.id) {
            outer.push(page.clone());
        }
    }

    let mut pages = Vec::new();
    for root in &outer {
        pages.extend(subtree(dbs, tx, root, false)?);
    }

    let page_refs: HashMap<PageId, usize> = pages.iter().enumerate().map(|(i, p)| (p.id, i)).collect();
    let mut bundle = ExportBundle {
        space_id: *space,
        pages: Vec::with_capacity(pages.len()),
        permissions: Vec::new(),
        block_references: Vec::new(),
    };
    let mut permission_refs: HashMap<PermissionId, usize> = HashMap::new();
    for (i, page) in pages.iter().enumerate() {
        for entry in dbs.permissions_for_page(tx, &page.id)? {
            let inheritance = match entry.inherited_from {
                None => InheritanceRef::Local,
                Some(origin) => match permission_refs.get(&origin) {
                    Some(&permission_ref) => InheritanceRef::Internal { permission_ref },
                    None => InheritanceRef::External,
                },
            };
            permission_refs.insert(entry.id, bundle.permissions.len());
            bundle.permissions.push(ExportedPermission {
                page_ref: i,
                assignee: entry.assignee,
                level: entry.level,
                inheritance,
                source: entry.source,
            });
        }
        if let Some(content_id) = page.content_id {
            bundle.block_references.push(BlockReference { page_ref: i, content_id });
        }
        bundle.pages.push(ExportedPage {
            source_id: page.id,
            parent_ref: page.parent_id.and_then(|p| page_refs.get(&p).copied()),
            index: page.index,
            page_type: page.page_type,
            title: page.title.clone(),
            path: page.path.clone(),
            content_id: page.content_id,
            created_by: page.created_by,
        });
    }
    Ok(bundle)
}

// ============================================================================
// Import
// ============================================================================

/// Materialize `bundle` under `target_parent` in the actor's space
pub(crate) fn import_into(
    tx: &mut Tx<'_>,
    actor: &Actor,
    bundle: &ExportBundle,
    target_parent: Option<PageId>,
    options: &ImportOptions,
    max_depth: usize,
) -> Result<ImportResult> {
    bundle.check()?;
    let space = tx
        .space(&actor.space_id)?
        .ok_or_else(|| Error::not_found("space", actor.space_id))?;
    if let Some(parent_id) = target_parent {
        live_page(tx, actor, &parent_id)?;
    }

    let mut created: Vec<Page> = Vec::with_capacity(bundle.pages.len());
    let mut page_id_map = BTreeMap::new();
    for exported in &bundle.pages {
        let id = new_id()?;
        let mut page = Page {
            id,
            space_id: space.id,
            parent_id: match exported.parent_ref {
                Some(r) => Some(created[r].id),
                None => target_parent,
            },
            index: exported.index,
            page_type: exported.page_type,
            title: exported.title.clone(),
            path: if options.reset_paths { page_path(&id) } else { exported.path.clone() },
            content_id: exported.content_id,
            created_by: exported.created_by,
            deleted_at: None,
        };
        if exported.parent_ref.is_none() {
            place(tx, &mut page, None)?;
        }
        tx.put_page(&page)?;
        page_id_map.insert(exported.source_id, id);
        created.push(page);
    }

    if options.include_permissions {
        let mut made: Vec<Option<PermissionEntry>> = Vec::with_capacity(bundle.permissions.len());
        for (i, exported) in bundle.permissions.iter().enumerate() {
            let page = &created[exported.page_ref];
            let Some(assignee) = retarget(tx, &bundle.space_id, &space.id, exported.assignee)? else {
                tracing::warn!(
                    page_id = %page.id,
                    assignee = %exported.assignee,
                    "dropping imported entry with no counterpart in the target space"
                );
                made.push(None);
                continue;
            };
            if tx.permission_for_assignee(&page.id, &assignee)?.is_some() {
                return Err(Error::InvalidInput(format!("permission {i} duplicates {assignee} on its page")));
            }
            let internal = match exported.inheritance {
                InheritanceRef::Internal { permission_ref } => {
                    made.get(permission_ref).and_then(Option::as_ref).map(PermissionEntry::origin)
                }
                _ => None,
            };
            let inherited_from = match (exported.inheritance, internal) {
                (InheritanceRef::Local, _) => None,
                (_, Some(origin)) => Some(origin),
                // Outside the bundle: local at a bundle root, else follow the new parent
                _ => match page.parent_id.filter(|_| bundle.pages[exported.page_ref].parent_ref.is_some()) {
                    Some(parent) => tx.permission_for_assignee(&parent, &assignee)?.map(|p| p.origin()),
                    None => None,
                },
            };
            let entry = tx.create_permission(page, assignee, exported.level, inherited_from, exported.source.clone())?;
            made.push(Some(entry));
        }
    }

    let mut root_page_ids = Vec::new();
    for root in bundle.root_refs().map(|i| &created[i]) {
        cascade(tx, root, max_depth)?;
        root_page_ids.push(root.id);
    }
    Ok(ImportResult { pages: created, root_page_ids, page_id_map })
}

/// Counterpart of `assignee` in the target space, if it has one
fn retarget(
    tx: &Tx<'_>,
    from: &SpaceId,
    to: &SpaceId,
    assignee: PermissionAssignee,
) -> Result<Option<PermissionAssignee>> {
    Ok(match assignee {
        PermissionAssignee::Public => Some(assignee),
        PermissionAssignee::Space { id } if id == *from || id == *to => Some(PermissionAssignee::Space { id: *to }),
        PermissionAssignee::Space { .. } => None,
        PermissionAssignee::User { id } => tx.membership(to, &id)?.map(|_| assignee),
        PermissionAssignee::Role { id } => tx.role(&id)?.filter(|r| r.space_id == *to).map(|_| assignee),
    })
}

impl PageTree {
    /// Snapshot the live subtrees under `roots`
    pub fn export(&self, actor: &Actor, roots: &[PageId]) -> Result<ExportBundle> {
        let max_depth = self.max_depth();
        self.store()
            .read(|dbs, tx| export_from(dbs, tx, &actor.space_id, roots, max_depth))
    }

    pub fn import(
        &self,
        ctx: &OpContext,
        actor: &Actor,
        bundle: &ExportBundle,
        target_parent: Option<PageId>,
        options: ImportOptions,
    ) -> Result<ImportResult> {
        let max_depth = self.max_depth();
        let result = self.commit_as(ctx, actor, "import", |tx, delta| {
            let result = import_into(tx, actor, bundle, target_parent, &options, max_depth)?;
            delta.meta.extend(result.pages.iter().cloned());
            Ok(result)
        })?;
        tracing::info!(
            source_space = %bundle.space_id,
            pages = result.pages.len(),
            roots = result.root_page_ids.len(),
            "bundle imported"
        );
        Ok(result)
    }
}
