//! Pagetree - hierarchical page permission inheritance
//!
//! Permission entries hang off a tree of pages and flow down it. Each entry
//! is either locally defined on its page or inherited, in which case it
//! points at the locally-defined entry it copies. Structural changes
//! (create, move, duplicate, trash) re-resolve the affected subtree inside
//! one LMDB write transaction.
//!
//! ```no_run
//! use pagetree::{Actor, Config, NewPage, PageTree, PermissionAssignee, PermissionLevel, SpaceDefaults};
//!
//! # fn main() -> pagetree::Result<()> {
//! let tree = PageTree::open(&Config::default())?;
//! let ctx = tree.context();
//! let space = tree.create_space(&ctx, "docs", SpaceDefaults::default())?;
//! let admin = tree.create_user(&ctx, "ada")?;
//! let actor = Actor::admin(admin.id, space.id);
//!
//! let root = tree.create_page(
//!     &tree.context(),
//!     &actor,
//!     NewPage::root(space.id).with_permission(PermissionAssignee::Space { id: space.id }, PermissionLevel::View),
//! )?;
//! let child = tree.create_page(&tree.context(), &actor, NewPage::child(space.id, root.page.id))?;
//! assert_eq!(child.permissions[0].inherited_from, Some(root.permissions[0].id));
//! # Ok(())
//! # }
//! ```

pub mod broadcast;
pub mod bundle;
pub mod cascade;
pub mod config;
pub mod constants;
pub mod context;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod guard;
pub mod keys;
pub mod model;
pub mod read;
pub mod resolver;
pub mod tenant;
pub mod tx;
pub mod verify;

pub use broadcast::{Broadcaster, ChangeEvent, ChangeKind, ChannelBroadcaster, NoopBroadcaster, TracingBroadcaster};
pub use bundle::{BlockReference, ExportBundle, ExportedPage, ExportedPermission, ImportOptions, ImportResult, InheritanceRef};
pub use cascade::CascadeStats;
pub use config::{Config, ConfigLoader, EngineConfig, ServerConfig, StorageConfig};
pub use context::{Actor, CancelToken, OpContext};
pub use coordinator::PageTree;
pub use error::{Error, Result};
pub use model::*;
pub use resolver::{Change, Target};
pub use tenant::SpaceDefaults;
pub use verify::Violation;
