//! Consistency check of a space's tree and permission rows

use std::collections::HashSet;

use heed::RoTxn;
use serde::Serialize;

use crate::db::Dbs;
use crate::error::{Error, Result};
use crate::model::{PageId, PermissionAssignee, PermissionId, SpaceId};
use crate::read::live_ancestors;
use crate::resolver::{plan, resolve};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// Parent row is missing or belongs to another space
    BrokenParent { page_id: PageId },
    /// Parent chain loops or runs deeper than the configured limit
    TooDeep { page_id: PageId },
    LiveUnderTrashed { page_id: PageId },
    DuplicateAssignee { page_id: PageId, assignee: PermissionAssignee },
    MissingOrigin { permission_id: PermissionId, origin: PermissionId },
    /// Points at an inherited entry instead of a locally-defined one
    ChainedPointer { permission_id: PermissionId, origin: PermissionId },
    OriginNotAncestor { permission_id: PermissionId, origin: PermissionId },
    /// Stored entries differ from what resolution would produce
    Unresolved { page_id: PageId },
}

pub fn verify_space(dbs: &Dbs, tx: &RoTxn, space: &SpaceId, max_depth: usize) -> Result<Vec<Violation>> {
    let mut r = Vec::new();
    for page in dbs.pages_in_space(tx, space)? {
        if let Some(parent_id) = page.parent_id {
            match dbs.page(tx, &parent_id)? {
                Some(parent) if parent.space_id == *space => {
                    if page.is_live() && !parent.is_live() {
                        r.push(Violation::LiveUnderTrashed { page_id: page.id });
                    }
                }
                _ => {
                    r.push(Violation::BrokenParent { page_id: page.id });
                    continue;
                }
            }
        }
        let above = match live_ancestors(dbs, tx, &page, max_depth) {
            Ok(above) => above,
            // Trashed pages are held to the depth limit when restored
            Err(Error::InvalidState(_)) if !page.is_live() => Vec::new(),
            Err(Error::InvalidState(_)) => {
                r.push(Violation::TooDeep { page_id: page.id });
                continue;
            }
            Err(e) => return Err(e),
        };
        let above_ids: HashSet<PageId> = above.iter().map(|p| p.id).collect();

        let entries = dbs.permissions_for_page(tx, &page.id)?;
        let mut assignees = HashSet::new();
        for entry in &entries {
            if !assignees.insert(entry.assignee) {
                r.push(Violation::DuplicateAssignee { page_id: page.id, assignee: entry.assignee });
            }
            // Trashed subtrees keep their pointers until restore re-resolves them
            let Some(origin) = entry.inherited_from.filter(|_| page.is_live()) else { continue };
            match dbs.permission(tx, &origin)? {
                None => r.push(Violation::MissingOrigin { permission_id: entry.id, origin }),
                Some(o) if !o.is_local() => r.push(Violation::ChainedPointer { permission_id: entry.id, origin }),
                Some(o) if !above_ids.contains(&o.page_id) => {
                    r.push(Violation::OriginNotAncestor { permission_id: entry.id, origin })
                }
                Some(_) => {}
            }
        }

        if page.is_live() {
            let parent = match above.first() {
                Some(p) => dbs.permissions_for_page(tx, &p.id)?,
                None => Vec::new(),
            };
            if !plan(&entries, resolve(&parent, &entries)).is_empty() {
                r.push(Violation::Unresolved { page_id: page.id });
            }
        }
    }
    Ok(r)
}
