//! Random mutation sequences keep the tree and its entries consistent

mod common;

use common::Fixture;
use pagetree::*;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Create { parent: Option<usize>, grant: Option<(usize, usize)> },
    Move { page: usize, parent: Option<usize> },
    Upsert { page: usize, assignee: usize, level: usize },
    Remove { page: usize, assignee: usize },
    Trash { page: usize },
    Restore { page: usize },
    Duplicate { page: usize, parent: Option<usize> },
}

const LEVELS: [PermissionLevel; 4] =
    [PermissionLevel::View, PermissionLevel::Comment, PermissionLevel::Editor, PermissionLevel::FullAccess];

fn op() -> impl Strategy<Value = Op> {
    let slot = || proptest::option::of(0usize..16);
    prop_oneof![
        3 => (slot(), proptest::option::of((0usize..3, 0usize..4)))
            .prop_map(|(parent, grant)| Op::Create { parent, grant }),
        3 => (0usize..16, slot()).prop_map(|(page, parent)| Op::Move { page, parent }),
        3 => (0usize..16, 0usize..3, 0usize..4).prop_map(|(page, assignee, level)| Op::Upsert { page, assignee, level }),
        2 => (0usize..16, 0usize..3).prop_map(|(page, assignee)| Op::Remove { page, assignee }),
        1 => (0usize..16).prop_map(|page| Op::Trash { page }),
        1 => (0usize..16).prop_map(|page| Op::Restore { page }),
        1 => (0usize..16, slot()).prop_map(|(page, parent)| Op::Duplicate { page, parent }),
    ]
}

struct World {
    f: Fixture,
    assignees: [PermissionAssignee; 3],
    pages: Vec<PageId>,
}

impl World {
    fn new() -> Self {
        let f = Fixture::new();
        let user = f.member("member");
        let assignees = [f.space_assignee(), PermissionAssignee::Public, PermissionAssignee::User { id: user.id }];
        World { f, assignees, pages: Vec::new() }
    }

    fn pick(&self, i: usize) -> Option<PageId> {
        if self.pages.is_empty() {
            return None;
        }
        Some(self.pages[i % self.pages.len()])
    }

    /// Apply one op; policy rejections are expected and ignored
    fn apply(&mut self, op: &Op) {
        let f = &self.f;
        let ctx = f.ctx();
        match *op {
            Op::Create { parent, grant } => {
                let mut input = match parent.and_then(|i| self.pick(i)) {
                    Some(p) => NewPage::child(f.space.id, p),
                    None => NewPage::root(f.space.id),
                };
                if let Some((a, l)) = grant {
                    input = input.with_permission(self.assignees[a], LEVELS[l]);
                }
                if let Ok(created) = f.tree.create_page(&ctx, &f.actor, input) {
                    self.pages.push(created.page.id);
                }
            }
            Op::Move { page, parent } => {
                if let Some(page) = self.pick(page) {
                    let parent = parent.and_then(|i| self.pick(i));
                    let _ = f.tree.reposition_page(&ctx, &f.actor, page, parent, None);
                }
            }
            Op::Upsert { page, assignee, level } => {
                if let Some(page) = self.pick(page) {
                    let _ = f.tree.upsert_permission(&ctx, &f.actor, page, self.assignees[assignee], LEVELS[level]);
                }
            }
            Op::Remove { page, assignee } => {
                let Some(page) = self.pick(page) else { return };
                let Ok(entries) = f.tree.list_permissions(&f.actor, page) else { return };
                if let Some(entry) = entries.iter().find(|e| e.assignee == self.assignees[assignee]) {
                    let _ = f.tree.remove_permission(&ctx, &f.actor, entry.id);
                }
            }
            Op::Trash { page } => {
                if let Some(page) = self.pick(page) {
                    let _ = f.tree.trash_page(&ctx, &f.actor, page);
                }
            }
            Op::Restore { page } => {
                if let Some(page) = self.pick(page) {
                    let _ = f.tree.restore_page(&ctx, &f.actor, page);
                }
            }
            Op::Duplicate { page, parent } => {
                if let Some(page) = self.pick(page) {
                    let parent = parent.and_then(|i| self.pick(i));
                    if let Ok(result) = f.tree.duplicate_subtree(&ctx, &f.actor, page, parent) {
                        self.pages.extend(result.page_id_map.values().copied());
                    }
                }
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn random_mutations_keep_the_tree_consistent(ops in proptest::collection::vec(op(), 1..24)) {
        let mut world = World::new();
        for op in &ops {
            world.apply(op);
            let violations = world.f.tree.verify_tree(&world.f.actor).unwrap();
            prop_assert!(violations.is_empty(), "after {:?}: {:?}", op, violations);
        }
    }

    #[test]
    fn live_pages_resolve_to_their_stored_entries(ops in proptest::collection::vec(op(), 1..16)) {
        let mut world = World::new();
        for op in &ops {
            world.apply(op);
        }
        for page in &world.pages {
            let Ok(current) = world.f.tree.get_page(&world.f.actor, *page) else { continue };
            if !current.is_live() {
                continue;
            }
            let stored = world.f.tree.list_permissions(&world.f.actor, *page).unwrap();
            let targets = world.f.tree.resolved_permissions(&world.f.actor, *page).unwrap();
            prop_assert_eq!(stored.len(), targets.len());
            for target in targets {
                let entry = stored.iter().find(|e| e.assignee == target.assignee);
                prop_assert!(entry.is_some_and(|e| e.level == target.level && e.inherited_from == target.inherited_from));
            }
        }
    }
}
