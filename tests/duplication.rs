//! Subtree export, import and duplication

mod common;

use std::collections::HashMap;

use common::Fixture;
use pagetree::*;

/// Count of (local, inherited) entries on a page
fn shape(f: &Fixture, page: PageId) -> (usize, usize) {
    let entries = f.perms(page);
    let local = entries.iter().filter(|e| e.is_local()).count();
    (local, entries.len() - local)
}

struct Sample {
    root: PageWithPermissions,
    a: PageWithPermissions,
    b: PageWithPermissions,
    writer: User,
}

/// R{space: view} -> A{writer: editor} -> B
fn sample(f: &Fixture) -> Sample {
    let writer = f.member("writer");
    let root = f.root(&[(f.space_assignee(), PermissionLevel::View)]);
    let a = f.child(root.page.id, &[(PermissionAssignee::User { id: writer.id }, PermissionLevel::Editor)]);
    let b = f.child(a.page.id, &[]);
    Sample { root, a, b, writer }
}

#[test]
fn duplicating_a_whole_tree_keeps_its_shape() {
    let f = Fixture::new();
    let s = sample(&f);

    let dup = f.tree.duplicate_subtree(&f.ctx(), &f.actor, s.root.page.id, None).unwrap();
    assert_eq!(dup.pages.len(), 3);
    assert_eq!(dup.root_page_ids.len(), 1);

    for original in [&s.root, &s.a, &s.b] {
        let copy = dup.page_id_map[&original.page.id];
        assert_ne!(copy, original.page.id);
        assert_eq!(shape(&f, copy), shape(&f, original.page.id));
    }

    // Pointers land on the duplicated entries, never the originals
    let originals: Vec<PermissionId> = [&s.root, &s.a, &s.b]
        .iter()
        .flat_map(|p| f.perms(p.page.id))
        .map(|e| e.id)
        .collect();
    for copy in dup.page_id_map.values() {
        for entry in f.perms(*copy) {
            if let Some(origin) = entry.inherited_from {
                assert!(!originals.contains(&origin));
            }
        }
    }
    f.assert_consistent();
}

#[test]
fn entries_from_outside_the_subtree_become_local_at_the_copy_root() {
    let f = Fixture::new();
    let s = sample(&f);
    let target = f.root(&[]);

    let dup = f.tree.duplicate_subtree(&f.ctx(), &f.actor, s.a.page.id, Some(target.page.id)).unwrap();
    let a2 = dup.page_id_map[&s.a.page.id];
    let b2 = dup.page_id_map[&s.b.page.id];
    assert_eq!(dup.root_page_ids, vec![a2]);
    assert_eq!(f.tree.get_page(&f.actor, a2).unwrap().parent_id, Some(target.page.id));

    let space_entry = f.entry_for(a2, f.space_assignee());
    assert!(space_entry.is_local());
    assert_eq!(space_entry.level, PermissionLevel::View);
    assert_eq!(shape(&f, a2), (2, 0));

    // Below the copy root, entries re-inherit from the copy
    let writer = PermissionAssignee::User { id: s.writer.id };
    assert_eq!(f.entry_for(b2, f.space_assignee()).inherited_from, Some(space_entry.id));
    assert_eq!(f.entry_for(b2, writer).inherited_from, Some(f.entry_for(a2, writer).id));
    f.assert_consistent();
}

#[test]
fn copy_inherits_grants_of_its_new_parent() {
    let f = Fixture::new();
    let s = sample(&f);
    let target = f.root(&[(PermissionAssignee::Public, PermissionLevel::View)]);

    let dup = f.tree.duplicate_subtree(&f.ctx(), &f.actor, s.a.page.id, Some(target.page.id)).unwrap();

    let public = target.permissions[0].id;
    for copy in dup.page_id_map.values() {
        assert_eq!(f.entry_for(*copy, PermissionAssignee::Public).inherited_from, Some(public));
    }
    // The source subtree is untouched
    assert_eq!(f.perms(s.a.page.id).len(), 2);
    f.assert_consistent();
}

#[test]
fn duplicate_gets_fresh_paths_and_is_appended() {
    let f = Fixture::new();
    let s = sample(&f);
    let sibling = f.child(s.root.page.id, &[]);

    let dup = f.tree.duplicate_subtree(&f.ctx(), &f.actor, s.a.page.id, Some(s.root.page.id)).unwrap();
    let copy = f.tree.get_page(&f.actor, dup.root_page_ids[0]).unwrap();
    assert_eq!(copy.path, page_path(&copy.id));
    assert!(copy.index > sibling.page.index);

    let children = f.tree.list_children(&f.actor, s.root.page.id).unwrap();
    assert_eq!(children.last().map(|p| p.id), Some(copy.id));
}

#[test]
fn duplicating_a_foreign_page_reads_as_missing() {
    let f = Fixture::new();
    let other = f.tree.create_space(&f.ctx(), "other", SpaceDefaults::default()).unwrap();
    let foreign = f
        .tree
        .create_page(&f.ctx(), &Actor::admin(f.admin.id, other.id), NewPage::root(other.id))
        .unwrap();

    let err = f.tree.duplicate_subtree(&f.ctx(), &f.actor, foreign.page.id, None).unwrap_err();
    assert!(matches!(err, Error::DataNotFound(_)));
    let err = f.tree.export(&f.actor, &[foreign.page.id]).unwrap_err();
    assert!(matches!(err, Error::DataNotFound(_)));
}

// ============================================================================
// Export bundles
// ============================================================================

#[test]
fn export_uses_relative_references() {
    let f = Fixture::new();
    let s = sample(&f);

    let bundle = f.tree.export(&f.actor, &[s.a.page.id]).unwrap();
    assert_eq!(bundle.pages.len(), 2);
    assert_eq!(bundle.pages[0].parent_ref, None);
    assert_eq!(bundle.pages[1].parent_ref, Some(0));

    let kinds: HashMap<usize, Vec<InheritanceRef>> =
        bundle.permissions.iter().fold(HashMap::new(), |mut m, p| {
            m.entry(p.page_ref).or_default().push(p.inheritance);
            m
        });
    assert!(kinds[&0].contains(&InheritanceRef::External));
    assert!(kinds[&0].contains(&InheritanceRef::Local));
    assert!(kinds[&1].iter().any(|k| matches!(k, InheritanceRef::Internal { .. })));
    assert!(kinds[&1].contains(&InheritanceRef::External));
}

#[test]
fn nested_roots_are_folded_into_their_ancestor() {
    let f = Fixture::new();
    let s = sample(&f);

    let bundle = f.tree.export(&f.actor, &[s.b.page.id, s.root.page.id]).unwrap();
    assert_eq!(bundle.pages.len(), 3);
    assert_eq!(bundle.pages.iter().filter(|p| p.parent_ref.is_none()).count(), 1);
}

#[test]
fn trashed_pages_are_not_exported() {
    let f = Fixture::new();
    let s = sample(&f);
    f.tree.trash_page(&f.ctx(), &f.actor, s.b.page.id).unwrap();

    let bundle = f.tree.export(&f.actor, &[s.root.page.id]).unwrap();
    assert_eq!(bundle.pages.len(), 2);

    let err = f.tree.export(&f.actor, &[s.b.page.id]).unwrap_err();
    assert!(matches!(err, Error::DataNotFound(_)));
}

#[test]
fn content_ids_travel_as_block_references() {
    let f = Fixture::new();
    let content = new_id().unwrap();
    let mut input = NewPage::root(f.space.id).titled("doc");
    input.content_id = Some(content);
    let page = f.tree.create_page(&f.ctx(), &f.actor, input).unwrap();

    let bundle = f.tree.export(&f.actor, &[page.page.id]).unwrap();
    assert_eq!(bundle.block_references, vec![BlockReference { page_ref: 0, content_id: content }]);
}

#[test]
fn tampered_bundle_is_rejected() {
    let f = Fixture::new();
    let s = sample(&f);
    let mut bundle = f.tree.export(&f.actor, &[s.root.page.id]).unwrap();
    bundle.pages[0].parent_ref = Some(2);

    let err = ExportBundle::from_json(&bundle.to_json().unwrap()).unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    let err = f.tree.import(&f.ctx(), &f.actor, &bundle, None, ImportOptions::default()).unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

// ============================================================================
// Import into another space
// ============================================================================

#[test]
fn import_into_another_space_retargets_assignees() {
    let f = Fixture::new();
    let shared = f.member("shared");
    let local_only = f.member("local-only");
    let role = f.tree.create_role(&f.ctx(), f.space.id, "reviewers", None).unwrap();
    let root = f.root(&[
        (f.space_assignee(), PermissionLevel::Editor),
        (PermissionAssignee::Public, PermissionLevel::View),
        (PermissionAssignee::User { id: shared.id }, PermissionLevel::FullAccess),
        (PermissionAssignee::User { id: local_only.id }, PermissionLevel::Comment),
        (PermissionAssignee::Role { id: role.id }, PermissionLevel::Comment),
    ]);
    let child = f.child(root.page.id, &[]);
    let json = f.tree.export(&f.actor, &[root.page.id]).unwrap().to_json().unwrap();

    let other = f.tree.create_space(&f.ctx(), "other", SpaceDefaults::default()).unwrap();
    for user in [f.admin.id, shared.id] {
        f.tree
            .add_member(&f.ctx(), Membership { space_id: other.id, user_id: user, is_admin: false, is_guest: false })
            .unwrap();
    }
    let actor = Actor::admin(f.admin.id, other.id);
    let bundle = ExportBundle::from_json(&json).unwrap();
    let imported = f.tree.import(&f.ctx(), &actor, &bundle, None, ImportOptions::default()).unwrap();

    let new_root = imported.page_id_map[&root.page.id];
    let new_child = imported.page_id_map[&child.page.id];
    let assignees: Vec<PermissionAssignee> = f
        .tree
        .list_permissions(&actor, new_root)
        .unwrap()
        .into_iter()
        .map(|e| e.assignee)
        .collect();
    assert_eq!(assignees.len(), 3);
    assert!(assignees.contains(&PermissionAssignee::Space { id: other.id }));
    assert!(assignees.contains(&PermissionAssignee::Public));
    assert!(assignees.contains(&PermissionAssignee::User { id: shared.id }));

    let child_entries = f.tree.list_permissions(&actor, new_child).unwrap();
    assert_eq!(child_entries.len(), 3);
    assert!(child_entries.iter().all(|e| e.space_id == other.id && !e.is_local()));

    // Paths survive without reset_paths
    assert_eq!(f.tree.get_page(&actor, new_root).unwrap().path, root.page.path);
    assert!(f.tree.verify_tree(&actor).unwrap().is_empty());
    f.assert_consistent();
}

#[test]
fn import_without_permissions_only_inherits_from_target() {
    let f = Fixture::new();
    let s = sample(&f);
    let bundle = f.tree.export(&f.actor, &[s.a.page.id]).unwrap();
    let target = f.root(&[(PermissionAssignee::Public, PermissionLevel::View)]);

    let options = ImportOptions { reset_paths: true, include_permissions: false };
    let imported = f.tree.import(&f.ctx(), &f.actor, &bundle, Some(target.page.id), options).unwrap();

    for copy in imported.page_id_map.values() {
        let entries = f.perms(*copy);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].assignee, PermissionAssignee::Public);
    }
    f.assert_consistent();
}

#[test]
fn import_options_default_to_keeping_permissions() {
    let options: ImportOptions = serde_json::from_str("{}").unwrap();
    assert_eq!(options, ImportOptions::default());
    assert!(options.include_permissions);
    assert!(!options.reset_paths);
}
