//! Tenant records: spaces, users, memberships and roles

use serde::{Deserialize, Serialize};

use crate::context::OpContext;
use crate::coordinator::PageTree;
use crate::error::{Error, Result};
use crate::model::*;

/// Permissions new root pages of a space start with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceDefaults {
    #[serde(default)]
    pub default_page_permission: Option<PermissionLevel>,
    #[serde(default)]
    pub default_public_pages: bool,
}

fn required(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::InvalidInput(format!("{field} must not be empty")));
    }
    Ok(value.to_string())
}

impl PageTree {
    pub fn create_space(&self, ctx: &OpContext, name: &str, defaults: SpaceDefaults) -> Result<Space> {
        let space = Space {
            id: new_id()?,
            name: required("space name", name)?,
            default_page_permission: defaults.default_page_permission,
            default_public_pages: defaults.default_public_pages,
        };
        self.commit(ctx, space.id, "create_space", |tx, _| tx.put_space(&space))?;
        Ok(space)
    }

    pub fn update_space_defaults(&self, ctx: &OpContext, space_id: SpaceId, defaults: SpaceDefaults) -> Result<Space> {
        self.commit(ctx, space_id, "update_space_defaults", |tx, _| {
            let mut space = tx.space(&space_id)?.ok_or_else(|| Error::not_found("space", space_id))?;
            space.default_page_permission = defaults.default_page_permission;
            space.default_public_pages = defaults.default_public_pages;
            tx.put_space(&space)?;
            Ok(space)
        })
    }

    pub fn create_user(&self, ctx: &OpContext, username: &str) -> Result<User> {
        let user = User { id: new_id()?, username: required("username", username)? };
        self.store().transact(ctx, |tx| tx.put_user(&user))?;
        tracing::debug!(user_id = %user.id, "user created");
        Ok(user)
    }

    /// Add or update a user's membership in a space
    pub fn add_member(&self, ctx: &OpContext, membership: Membership) -> Result<Membership> {
        self.commit(ctx, membership.space_id, "add_member", |tx, _| {
            if tx.space(&membership.space_id)?.is_none() {
                return Err(Error::not_found("space", membership.space_id));
            }
            if tx.user(&membership.user_id)?.is_none() {
                return Err(Error::not_found("user", membership.user_id));
            }
            tx.put_membership(&membership)?;
            Ok(membership)
        })
    }

    /// `source` marks the role as managed by an external integration
    pub fn create_role(&self, ctx: &OpContext, space_id: SpaceId, name: &str, source: Option<&str>) -> Result<Role> {
        let role = Role {
            id: new_id()?,
            space_id,
            name: required("role name", name)?,
            source: source.map(str::to_string),
        };
        self.commit(ctx, space_id, "create_role", |tx, _| {
            if tx.space(&space_id)?.is_none() {
                return Err(Error::not_found("space", space_id));
            }
            tx.put_role(&role)
        })?;
        Ok(role)
    }

    pub fn get_space(&self, id: SpaceId) -> Result<Space> {
        self.store()
            .read(|dbs, tx| dbs.space(tx, &id))?
            .ok_or_else(|| Error::not_found("space", id))
    }

    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.store()
            .read(|dbs, tx| dbs.user(tx, &id))?
            .ok_or_else(|| Error::not_found("user", id))
    }

    pub fn get_role(&self, id: RoleId) -> Result<Role> {
        self.store()
            .read(|dbs, tx| dbs.role(tx, &id))?
            .ok_or_else(|| Error::not_found("role", id))
    }

    pub fn get_membership(&self, space_id: SpaceId, user_id: UserId) -> Result<Option<Membership>> {
        self.store().read(|dbs, tx| dbs.membership(tx, &space_id, &user_id))
    }

    pub fn list_role_members(&self, role_id: RoleId) -> Result<Vec<User>> {
        self.store().read(|dbs, tx| {
            if dbs.role(tx, &role_id)?.is_none() {
                return Err(Error::not_found("role", role_id));
            }
            let mut r = Vec::new();
            for user_id in dbs.role_members(tx, &role_id)? {
                if let Some(user) = dbs.user(tx, &user_id)? {
                    r.push(user);
                }
            }
            Ok(r)
        })
    }

    pub fn roles_for_user(&self, space_id: SpaceId, user_id: UserId) -> Result<Vec<Role>> {
        self.store().read(|dbs, tx| {
            let mut r = Vec::new();
            for role in dbs.roles_in_space(tx, &space_id)? {
                if dbs.role_assignment(tx, &role.id, &user_id)?.is_some() {
                    r.push(role);
                }
            }
            Ok(r)
        })
    }
}
