//! Domain records stored by the engine

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::PAGE_PATH_PREFIX;
use crate::error::{Error, Result};

pub type PageId = Uuid;
pub type SpaceId = Uuid;
pub type UserId = Uuid;
pub type RoleId = Uuid;
pub type PermissionId = Uuid;

/// Generate a fresh random (v4) identifier
pub fn new_id() -> Result<Uuid> {
    let mut bytes = [0u8; 16];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| Error::Internal(format!("entropy source failed: {e}")))?;
    Ok(uuid::Builder::from_random_bytes(bytes).into_uuid())
}

// ============================================================================
// Permission levels
// ============================================================================

/// Access granted by a permission entry.
///
/// The named levels are totally ordered (`view < comment < editor <
/// full_access`). `custom` marks a grant whose operations the application
/// defines elsewhere; the engine only propagates it and compares it to itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    View,
    Comment,
    Editor,
    FullAccess,
    Custom,
}

const LEVELS: &[(&str, PermissionLevel)] = &[
    ("view", PermissionLevel::View),
    ("comment", PermissionLevel::Comment),
    ("editor", PermissionLevel::Editor),
    ("full_access", PermissionLevel::FullAccess),
    ("custom", PermissionLevel::Custom),
];

impl PermissionLevel {
    pub fn rank(self) -> Option<u8> {
        match self {
            PermissionLevel::View => Some(1),
            PermissionLevel::Comment => Some(2),
            PermissionLevel::Editor => Some(3),
            PermissionLevel::FullAccess => Some(4),
            PermissionLevel::Custom => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        LEVELS
            .iter()
            .find(|(_, l)| *l == self)
            .map(|(n, _)| *n)
            .unwrap_or("custom")
    }
}

impl PartialOrd for PermissionLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self == other {
            return Some(Ordering::Equal);
        }
        Some(self.rank()?.cmp(&other.rank()?))
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        LEVELS
            .iter()
            .find(|(n, _)| *n == s)
            .map(|(_, l)| *l)
            .ok_or_else(|| Error::InvalidInput(format!("unknown permission level '{s}'")))
    }
}

// ============================================================================
// Assignees
// ============================================================================

/// Who a permission entry grants access to. Exactly one shape per entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "group", rename_all = "snake_case")]
pub enum PermissionAssignee {
    User { id: UserId },
    Role { id: RoleId },
    Space { id: SpaceId },
    Public,
}

impl PermissionAssignee {
    pub fn group(&self) -> &'static str {
        match self {
            PermissionAssignee::User { .. } => "user",
            PermissionAssignee::Role { .. } => "role",
            PermissionAssignee::Space { .. } => "space",
            PermissionAssignee::Public => "public",
        }
    }

    pub fn id(&self) -> Option<Uuid> {
        match self {
            PermissionAssignee::User { id }
            | PermissionAssignee::Role { id }
            | PermissionAssignee::Space { id } => Some(*id),
            PermissionAssignee::Public => None,
        }
    }

    /// Public access is restricted to read-only
    pub fn allows(&self, level: PermissionLevel) -> bool {
        match self {
            PermissionAssignee::Public => level == PermissionLevel::View,
            _ => true,
        }
    }
}

impl fmt::Display for PermissionAssignee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id() {
            Some(id) => write!(f, "{}:{}", self.group(), id),
            None => f.write_str(self.group()),
        }
    }
}

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionEntry {
    pub id: PermissionId,
    pub page_id: PageId,
    pub space_id: SpaceId,
    pub assignee: PermissionAssignee,
    pub level: PermissionLevel,
    /// Provenance pointer to the locally-defined entry this one copies.
    #[serde(default)]
    pub inherited_from: Option<PermissionId>,
    /// Set when an external integration manages this entry.
    #[serde(default)]
    pub source: Option<String>,
}

impl PermissionEntry {
    #[inline]
    pub fn is_local(&self) -> bool {
        self.inherited_from.is_none()
    }

    /// The locally-defined entry at the top of this entry's inheritance
    #[inline]
    pub fn origin(&self) -> PermissionId {
        self.inherited_from.unwrap_or(self.id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    #[default]
    Page,
    Board,
    Card,
    Bounty,
    Proposal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    pub space_id: SpaceId,
    pub parent_id: Option<PageId>,
    pub index: u32,
    #[serde(rename = "type")]
    pub page_type: PageType,
    pub title: String,
    pub path: String,
    /// Reference to the body document owned by the content store
    #[serde(default)]
    pub content_id: Option<Uuid>,
    #[serde(default)]
    pub created_by: Option<UserId>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Page {
    #[inline]
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

pub fn page_path(id: &PageId) -> String {
    format!("{}{}", PAGE_PATH_PREFIX, id.simple())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageWithPermissions {
    #[serde(flatten)]
    pub page: Page,
    pub permissions: Vec<PermissionEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Space {
    pub id: SpaceId,
    pub name: String,
    /// Level granted to the whole space on new root pages
    #[serde(default)]
    pub default_page_permission: Option<PermissionLevel>,
    /// New root pages are readable by anyone
    #[serde(default)]
    pub default_public_pages: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub space_id: SpaceId,
    pub user_id: UserId,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub is_guest: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub space_id: SpaceId,
    pub name: String,
    /// e.g. `guild_xyz` for roles synced from an external integration
    #[serde(default)]
    pub source: Option<String>,
}

// ============================================================================
// Inputs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionInput {
    pub assignee: PermissionAssignee,
    pub level: PermissionLevel,
}

/// Input of `create_page`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPage {
    pub space_id: SpaceId,
    #[serde(default)]
    pub parent_id: Option<PageId>,
    #[serde(default, rename = "type")]
    pub page_type: PageType,
    #[serde(default)]
    pub title: String,
    /// Position among siblings; appended when absent
    #[serde(default)]
    pub index: Option<u32>,
    #[serde(default)]
    pub content_id: Option<Uuid>,
    #[serde(default)]
    pub created_by: Option<UserId>,
    /// Locally-defined entries for the new page
    #[serde(default)]
    pub permissions: Vec<PermissionInput>,
}

impl NewPage {
    pub fn root(space_id: SpaceId) -> Self {
        NewPage {
            space_id,
            parent_id: None,
            page_type: PageType::Page,
            title: String::new(),
            index: None,
            content_id: None,
            created_by: None,
            permissions: Vec::new(),
        }
    }

    pub fn child(space_id: SpaceId, parent_id: PageId) -> Self {
        NewPage { parent_id: Some(parent_id), ..NewPage::root(space_id) }
    }

    pub fn titled(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn created_by(mut self, user_id: UserId) -> Self {
        self.created_by = Some(user_id);
        self
    }

    pub fn with_permission(mut self, assignee: PermissionAssignee, level: PermissionLevel) -> Self {
        self.permissions.push(PermissionInput { assignee, level });
        self
    }
}
