//! Subtree re-resolution inside a write transaction

use std::collections::{HashSet, VecDeque};

use crate::error::{Error, Result};
use crate::model::{Page, PageId, PermissionEntry};
use crate::read::live_ancestors;
use crate::resolver::{plan, rehome, resolve, Change};
use crate::tx::Tx;

/// Counts of what one cascade wrote
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CascadeStats {
    pub pages: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Inherited entries relinked to a new ancestor after a move
    pub relinked: usize,
    /// Inherited entries kept as local after their chain broke
    pub detached: usize,
}

impl CascadeStats {
    pub fn writes(&self) -> usize {
        self.created + self.updated + self.deleted + self.relinked + self.detached
    }
}

/// Re-resolve `root` and its live descendants, parents before children.
pub(crate) fn cascade(tx: &mut Tx<'_>, root: &Page, max_depth: usize) -> Result<CascadeStats> {
    let mut stats = CascadeStats::default();
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([root.clone()]);
    while let Some(page) = queue.pop_front() {
        if !seen.insert(page.id) {
            return Err(Error::InvalidState(format!("cycle detected at page {}", page.id)));
        }
        resolve_page(tx, &page, max_depth, &mut stats)?;
        for child in tx.children(&page.id)? {
            if child.is_live() {
                queue.push_back(child);
            }
        }
    }
    tracing::debug!(root = %root.id, pages = stats.pages, writes = stats.writes(), "cascade finished");
    Ok(stats)
}

/// Resolved entries of the nearest live parent, and the ids of all live ancestors
pub(crate) fn inherited_view(tx: &Tx<'_>, page: &Page, max_depth: usize) -> Result<(Vec<PermissionEntry>, HashSet<PageId>)> {
    tx.check()?;
    let above = live_ancestors(tx.dbs(), tx.ro(), page, max_depth)?;
    let parent = match above.first() {
        Some(p) => tx.list_for_page(&p.id)?,
        None => Vec::new(),
    };
    Ok((parent, above.into_iter().map(|p| p.id).collect()))
}

fn resolve_page(tx: &mut Tx<'_>, page: &Page, max_depth: usize, stats: &mut CascadeStats) -> Result<()> {
    let (parent, above) = inherited_view(tx, page, max_depth)?;
    let mut existing = tx.list_for_page(&page.id)?;

    // Entries whose origin is gone or no longer above this page
    let mut broken = Vec::new();
    for entry in existing.iter().filter(|e| !e.is_local()) {
        let anchored = tx
            .permission(&entry.origin())?
            .is_some_and(|origin| above.contains(&origin.page_id));
        if !anchored {
            broken.push((entry.id, rehome(entry, &parent)));
        }
    }
    for (id, origin) in &broken {
        match origin {
            Some(_) => stats.relinked += 1,
            None => {
                stats.detached += 1;
                tracing::warn!(page_id = %page.id, permission_id = %id, "inheritance chain broken, keeping entry as local");
            }
        }
        tx.relink_permission(id, *origin)?;
    }
    if !broken.is_empty() {
        existing = tx.list_for_page(&page.id)?;
    }

    let changes = plan(&existing, resolve(&parent, &existing));
    if !changes.is_empty() {
        tracing::debug!(page_id = %page.id, changes = changes.len(), "resolved page");
    }
    for change in changes {
        match change {
            Change::Create(t) => {
                tx.create_permission(page, t.assignee, t.level, t.inherited_from, t.source)?;
                stats.created += 1;
            }
            Change::Update { id, target } => {
                tx.update_permission(&id, target.level)?;
                tx.relink_permission(&id, target.inherited_from)?;
                tx.set_permission_source(&id, target.source)?;
                stats.updated += 1;
            }
            Change::Delete(id) => {
                tx.delete_permission(&id)?;
                stats.deleted += 1;
            }
        }
    }
    stats.pages += 1;
    Ok(())
}
