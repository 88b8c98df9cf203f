//! Shared fixtures: one LMDB environment per test in a temp directory

#![allow(dead_code)]

use std::sync::mpsc::Receiver;
use std::sync::Arc;

use pagetree::*;
use tempfile::TempDir;

pub struct Fixture {
    pub tree: PageTree,
    pub space: Space,
    pub admin: User,
    pub actor: Actor,
    _dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_defaults(SpaceDefaults::default())
    }

    pub fn with_defaults(defaults: SpaceDefaults) -> Self {
        let dir = TempDir::new().unwrap();
        let config = Self::config(&dir);
        let tree = PageTree::open(&config).unwrap();
        Self::seed(tree, dir, defaults)
    }

    /// Fixture whose trees may be at most `levels` pages deep
    pub fn with_max_depth(levels: usize) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = Self::config(&dir);
        config.engine.max_tree_depth = levels;
        let tree = PageTree::open(&config).unwrap();
        Self::seed(tree, dir, SpaceDefaults::default())
    }

    /// Fixture whose change events land in the returned receiver
    pub fn with_events() -> (Self, Receiver<ChangeEvent>) {
        let dir = TempDir::new().unwrap();
        let config = Self::config(&dir);
        let (broadcaster, rx) = ChannelBroadcaster::channel();
        let tree = PageTree::open(&config).unwrap().with_broadcaster(Arc::new(broadcaster));
        let fixture = Self::seed(tree, dir, SpaceDefaults::default());
        // Drop the events produced by seeding
        while rx.try_recv().is_ok() {}
        (fixture, rx)
    }

    fn config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.storage = StorageConfig::at(dir.path());
        config.storage.map_size = 64 << 20;
        config
    }

    fn seed(tree: PageTree, dir: TempDir, defaults: SpaceDefaults) -> Self {
        let ctx = tree.context();
        let space = tree.create_space(&ctx, "workspace", defaults).unwrap();
        let admin = tree.create_user(&ctx, "admin").unwrap();
        tree.add_member(&ctx, Membership { space_id: space.id, user_id: admin.id, is_admin: true, is_guest: false })
            .unwrap();
        let actor = Actor::admin(admin.id, space.id);
        Fixture { tree, space, admin, actor, _dir: dir }
    }

    pub fn ctx(&self) -> OpContext {
        self.tree.context()
    }

    pub fn space_assignee(&self) -> PermissionAssignee {
        PermissionAssignee::Space { id: self.space.id }
    }

    /// A new user with a plain membership in the fixture space
    pub fn member(&self, name: &str) -> User {
        let user = self.tree.create_user(&self.ctx(), name).unwrap();
        self.tree
            .add_member(&self.ctx(), Membership { space_id: self.space.id, user_id: user.id, is_admin: false, is_guest: false })
            .unwrap();
        user
    }

    pub fn root(&self, permissions: &[(PermissionAssignee, PermissionLevel)]) -> PageWithPermissions {
        let mut input = NewPage::root(self.space.id).titled("root");
        for (assignee, level) in permissions {
            input = input.with_permission(*assignee, *level);
        }
        self.tree.create_page(&self.ctx(), &self.actor, input).unwrap()
    }

    pub fn child(&self, parent: PageId, permissions: &[(PermissionAssignee, PermissionLevel)]) -> PageWithPermissions {
        let mut input = NewPage::child(self.space.id, parent).titled("child");
        for (assignee, level) in permissions {
            input = input.with_permission(*assignee, *level);
        }
        self.tree.create_page(&self.ctx(), &self.actor, input).unwrap()
    }

    pub fn perms(&self, page: PageId) -> Vec<PermissionEntry> {
        self.tree.list_permissions(&self.actor, page).unwrap()
    }

    pub fn entry_for(&self, page: PageId, assignee: PermissionAssignee) -> PermissionEntry {
        self.perms(page)
            .into_iter()
            .find(|e| e.assignee == assignee)
            .unwrap_or_else(|| panic!("page {page} has no entry for {assignee}"))
    }

    pub fn assert_consistent(&self) {
        let violations = self.tree.verify_tree(&self.actor).unwrap();
        assert!(violations.is_empty(), "tree violations: {violations:?}");
    }
}
