//! Engine constants and defaults

use std::time::Duration;

// Storage defaults
pub const DEFAULT_MAP_SIZE: usize = 1 << 30;
pub const MIN_MAP_SIZE: usize = 1 << 20;
pub const DEFAULT_MAX_READERS: u32 = 126;
pub const MAX_DBS: u32 = 11;

// Named databases
pub const DB_SPACES: &str = "spaces";
pub const DB_USERS: &str = "users";
pub const DB_MEMBERSHIPS: &str = "memberships";
pub const DB_ROLES: &str = "roles";
pub const DB_ROLE_ASSIGNMENTS: &str = "role_assignments";
pub const DB_PAGES: &str = "pages";
pub const DB_CHILDREN: &str = "children";
pub const DB_PERMISSIONS: &str = "permissions";
pub const DB_PAGE_PERMISSIONS: &str = "page_permissions";
pub const DB_INHERITORS: &str = "inheritors";
pub const DB_META: &str = "meta";

/// Key in the meta table holding the committed revision counter
pub const REVISION_KEY: &str = "revision";

// Transaction bounds
pub const DEFAULT_TX_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum page tree depth walked before a tree is considered corrupt
pub const MAX_TREE_DEPTH: usize = 256;

/// Source tag written by the guild.xyz role sync integration
pub const GUILD_XYZ_SOURCE: &str = "guild_xyz";

/// Prefix of generated page paths
pub const PAGE_PATH_PREFIX: &str = "page-";
