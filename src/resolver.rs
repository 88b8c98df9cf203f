//! Inheritance resolution.
//!
//! Pure functions: given the entries a page's parent holds and the entries
//! the page holds now, compute the target set and the diff that gets there.
//! Locally-defined entries always survive; everything else mirrors the
//! parent, with provenance pointers flattened to the locally-defined origin.

use std::collections::{BTreeMap, HashMap};

use crate::model::{PermissionAssignee, PermissionEntry, PermissionId, PermissionLevel};

/// One entry of a page's target permission set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub assignee: PermissionAssignee,
    pub level: PermissionLevel,
    pub inherited_from: Option<PermissionId>,
    pub source: Option<String>,
}

impl Target {
    fn local(entry: &PermissionEntry) -> Self {
        Target {
            assignee: entry.assignee,
            level: entry.level,
            inherited_from: None,
            source: entry.source.clone(),
        }
    }

    fn inherit(parent: &PermissionEntry) -> Self {
        Target {
            assignee: parent.assignee,
            level: parent.level,
            inherited_from: Some(parent.origin()),
            source: parent.source.clone(),
        }
    }

    fn matches(&self, entry: &PermissionEntry) -> bool {
        self.level == entry.level && self.inherited_from == entry.inherited_from && self.source == entry.source
    }
}

/// A single store write needed to reach a target set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Create(Target),
    Update { id: PermissionId, target: Target },
    Delete(PermissionId),
}

/// Target set of a page, ordered by assignee.
///
/// `parent` is the resolved set of the nearest live parent (empty for a
/// root). Local entries of `existing` win over the parent per assignee.
pub fn resolve(parent: &[PermissionEntry], existing: &[PermissionEntry]) -> Vec<Target> {
    let mut r: BTreeMap<PermissionAssignee, Target> = BTreeMap::new();
    for entry in existing.iter().filter(|e| e.is_local()) {
        r.entry(entry.assignee).or_insert_with(|| Target::local(entry));
    }
    for entry in parent {
        r.entry(entry.assignee).or_insert_with(|| Target::inherit(entry));
    }
    r.into_values().collect()
}

/// Writes turning `existing` into `targets`. Deletes come first.
pub fn plan(existing: &[PermissionEntry], targets: Vec<Target>) -> Vec<Change> {
    let mut current: HashMap<PermissionAssignee, &PermissionEntry> =
        existing.iter().map(|e| (e.assignee, e)).collect();
    let mut writes = Vec::new();
    for target in targets {
        match current.remove(&target.assignee) {
            Some(entry) if target.matches(entry) => {}
            Some(entry) => writes.push(Change::Update { id: entry.id, target }),
            None => writes.push(Change::Create(target)),
        }
    }
    let mut stale: Vec<PermissionId> = current.into_values().map(|e| e.id).collect();
    stale.sort();
    let mut r: Vec<Change> = stale.into_iter().map(Change::Delete).collect();
    r.extend(writes);
    r
}

/// New origin for an inherited entry whose origin is no longer above its page.
///
/// When the parent grants the same assignee at the same level, the entry is
/// relinked to the parent's origin. Otherwise `None`: the entry becomes
/// locally defined so access is kept.
pub fn rehome(orphan: &PermissionEntry, parent: &[PermissionEntry]) -> Option<PermissionId> {
    parent
        .iter()
        .find(|p| p.assignee == orphan.assignee && p.level == orphan.level)
        .map(PermissionEntry::origin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::new_id;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use uuid::Uuid;

    fn entry(page: Uuid, assignee: PermissionAssignee, level: PermissionLevel, from: Option<Uuid>) -> PermissionEntry {
        PermissionEntry {
            id: new_id().unwrap(),
            page_id: page,
            space_id: Uuid::nil(),
            assignee,
            level,
            inherited_from: from,
            source: None,
        }
    }

    /// Apply a plan the way the store would
    fn apply(page: Uuid, existing: &[PermissionEntry], changes: Vec<Change>) -> Vec<PermissionEntry> {
        let mut rows: Vec<PermissionEntry> = existing.to_vec();
        for change in changes {
            match change {
                Change::Delete(id) => rows.retain(|e| e.id != id),
                Change::Update { id, target } => {
                    let row = rows.iter_mut().find(|e| e.id == id).unwrap();
                    row.level = target.level;
                    row.inherited_from = target.inherited_from;
                    row.source = target.source;
                }
                Change::Create(t) => {
                    let mut e = entry(page, t.assignee, t.level, t.inherited_from);
                    e.source = t.source;
                    rows.push(e);
                }
            }
        }
        rows
    }

    #[test]
    fn child_inherits_parent_space_entry() {
        let (root, child) = (new_id().unwrap(), new_id().unwrap());
        let space = PermissionAssignee::Space { id: new_id().unwrap() };
        let parent = vec![entry(root, space, PermissionLevel::View, None)];

        let targets = resolve(&parent, &[]);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].inherited_from, Some(parent[0].id));

        let rows = apply(child, &[], plan(&[], targets));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].level, PermissionLevel::View);
    }

    #[test]
    fn local_entry_wins_over_parent() {
        let (root, child) = (new_id().unwrap(), new_id().unwrap());
        let user = PermissionAssignee::User { id: new_id().unwrap() };
        let parent = vec![entry(root, user, PermissionLevel::View, None)];
        let local = vec![entry(child, user, PermissionLevel::Editor, None)];

        let targets = resolve(&parent, &local);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].level, PermissionLevel::Editor);
        assert!(targets[0].inherited_from.is_none());
        assert!(plan(&local, targets).is_empty());
    }

    #[test]
    fn pointers_flatten_to_origin() {
        let (root, mid) = (new_id().unwrap(), new_id().unwrap());
        let origin = entry(root, PermissionAssignee::Public, PermissionLevel::View, None);
        let middle = entry(mid, PermissionAssignee::Public, PermissionLevel::View, Some(origin.id));

        let targets = resolve(&[middle], &[]);
        assert_eq!(targets[0].inherited_from, Some(origin.id));
    }

    #[test]
    fn stale_inherited_entries_are_deleted() {
        let page = new_id().unwrap();
        let gone = entry(page, PermissionAssignee::Public, PermissionLevel::View, Some(new_id().unwrap()));
        let changes = plan(std::slice::from_ref(&gone), resolve(&[], std::slice::from_ref(&gone)));
        assert_eq!(changes, vec![Change::Delete(gone.id)]);
    }

    #[test]
    fn level_change_is_an_update() {
        let (root, child) = (new_id().unwrap(), new_id().unwrap());
        let space = PermissionAssignee::Space { id: new_id().unwrap() };
        let origin = entry(root, space, PermissionLevel::Editor, None);
        let stale = entry(child, space, PermissionLevel::View, Some(origin.id));

        let changes = plan(std::slice::from_ref(&stale), resolve(std::slice::from_ref(&origin), std::slice::from_ref(&stale)));
        assert!(matches!(&changes[..], [Change::Update { id, target }]
            if *id == stale.id && target.level == PermissionLevel::Editor));
    }

    #[test]
    fn rehome_prefers_matching_parent_entry() {
        let (old_root, new_root, page) = (new_id().unwrap(), new_id().unwrap(), new_id().unwrap());
        let space = PermissionAssignee::Space { id: new_id().unwrap() };
        let old = entry(old_root, space, PermissionLevel::View, None);
        let orphan = entry(page, space, PermissionLevel::View, Some(old.id));

        let same = entry(new_root, space, PermissionLevel::View, None);
        assert_eq!(rehome(&orphan, std::slice::from_ref(&same)), Some(same.id));

        let higher = entry(new_root, space, PermissionLevel::Editor, None);
        assert_eq!(rehome(&orphan, &[higher]), None);
        assert_eq!(rehome(&orphan, &[]), None);
    }

    fn assignee_strategy() -> impl Strategy<Value = PermissionAssignee> {
        // Small id pool so parent and page entries collide on assignees
        let id = (0u8..4).prop_map(|n| Uuid::from_bytes([n; 16]));
        prop_oneof![
            id.clone().prop_map(|id| PermissionAssignee::User { id }),
            id.clone().prop_map(|id| PermissionAssignee::Role { id }),
            id.prop_map(|id| PermissionAssignee::Space { id }),
            Just(PermissionAssignee::Public),
        ]
    }

    fn level_strategy() -> impl Strategy<Value = PermissionLevel> {
        prop_oneof![
            Just(PermissionLevel::View),
            Just(PermissionLevel::Comment),
            Just(PermissionLevel::Editor),
            Just(PermissionLevel::FullAccess),
            Just(PermissionLevel::Custom),
        ]
    }

    /// Entries with unique assignees; `inherited` marks which carry a pointer
    fn entries(page: Uuid, shape: Vec<(PermissionAssignee, PermissionLevel, bool)>) -> Vec<PermissionEntry> {
        let mut seen = HashSet::new();
        shape.into_iter()
            .filter(|(a, _, _)| seen.insert(*a))
            .map(|(a, l, inherited)| entry(page, a, l, inherited.then(|| new_id().unwrap())))
            .collect()
    }

    fn shape_strategy() -> impl Strategy<Value = Vec<(PermissionAssignee, PermissionLevel, bool)>> {
        prop::collection::vec((assignee_strategy(), level_strategy(), any::<bool>()), 0..10)
    }

    proptest! {
        #[test]
        fn resolved_sets_have_unique_assignees(parent in shape_strategy(), page in shape_strategy()) {
            let parent = entries(Uuid::from_bytes([9; 16]), parent);
            let existing = entries(Uuid::from_bytes([8; 16]), page);
            let targets = resolve(&parent, &existing);
            let unique: HashSet<_> = targets.iter().map(|t| t.assignee).collect();
            prop_assert_eq!(unique.len(), targets.len());
        }

        #[test]
        fn resolving_twice_changes_nothing(parent in shape_strategy(), page in shape_strategy()) {
            let page_id = Uuid::from_bytes([8; 16]);
            let parent = entries(Uuid::from_bytes([9; 16]), parent);
            let existing = entries(page_id, page);

            let once = apply(page_id, &existing, plan(&existing, resolve(&parent, &existing)));
            prop_assert!(plan(&once, resolve(&parent, &once)).is_empty());
        }

        #[test]
        fn inherited_targets_point_at_origins(parent in shape_strategy(), page in shape_strategy()) {
            let parent = entries(Uuid::from_bytes([9; 16]), parent);
            let existing = entries(Uuid::from_bytes([8; 16]), page);
            let inherited_ids: HashSet<_> = parent.iter().filter(|e| !e.is_local()).map(|e| e.id).collect();
            for target in resolve(&parent, &existing) {
                if let Some(from) = target.inherited_from {
                    prop_assert!(!inherited_ids.contains(&from));
                }
            }
        }

        #[test]
        fn local_entries_survive(parent in shape_strategy(), page in shape_strategy()) {
            let parent = entries(Uuid::from_bytes([9; 16]), parent);
            let existing = entries(Uuid::from_bytes([8; 16]), page);
            let changes = plan(&existing, resolve(&parent, &existing));
            for local in existing.iter().filter(|e| e.is_local()) {
                let touched = changes.iter().any(|c| match c {
                    Change::Delete(id) => *id == local.id,
                    Change::Update { id, .. } => *id == local.id,
                    Change::Create(_) => false,
                });
                prop_assert!(!touched);
            }
        }
    }
}
