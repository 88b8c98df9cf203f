//! Role/assignment guard.
//!
//! Decides who may hold a role and which entries the generic paths may
//! touch. Integration-managed rows (those carrying a `source`) are read-only
//! to everything except their owning integration.

use chrono::Utc;

use crate::context::{Actor, OpContext};
use crate::coordinator::PageTree;
use crate::error::{Error, Result};
use crate::model::*;
use crate::tx::Tx;

// ============================================================================
// Role assignment
// ============================================================================

impl PageTree {
    /// Assign a role of the actor's space. Returns false when already assigned.
    pub fn assign_role(&self, ctx: &OpContext, actor: &Actor, role_id: RoleId, user_id: UserId) -> Result<bool> {
        check_admin(actor)?;
        let assigned = self.commit_as(ctx, actor, "assign_role", |tx, _| {
            let role = scoped_role(tx, actor, &role_id)?;
            if tx.user(&user_id)?.is_none() {
                return Err(Error::not_found("user", user_id));
            }
            let membership = tx.membership(&role.space_id, &user_id)?.ok_or_else(|| {
                Error::InsecureOperation(format!("user {user_id} is not a member of space {}", role.space_id))
            })?;
            if membership.is_guest {
                return Err(Error::InvalidState(format!("guest {user_id} cannot hold roles")));
            }
            if tx.role_assignment(&role.id, &user_id)?.is_some() {
                return Ok(false);
            }
            tx.assign_role(&role.id, &user_id, now_millis())?;
            Ok(true)
        })?;
        if assigned {
            tracing::info!(role_id = %role_id, user_id = %user_id, "role assigned");
        }
        Ok(assigned)
    }

    pub fn unassign_role(&self, ctx: &OpContext, actor: &Actor, role_id: RoleId, user_id: UserId) -> Result<()> {
        check_admin(actor)?;
        self.commit_as(ctx, actor, "unassign_role", |tx, _| {
            let role = assigned_role(tx, actor, &role_id, &user_id)?;
            if let Some(source) = &role.source {
                return Err(Error::UndesirableOperation(format!(
                    "role {role_id} is managed by {source} and cannot be unassigned here"
                )));
            }
            tx.unassign_role(&role.id, &user_id)?;
            Ok(())
        })?;
        tracing::info!(role_id = %role_id, user_id = %user_id, "role unassigned");
        Ok(())
    }

    /// Unassign path for the integration that owns the role
    pub fn unassign_sourced_role(
        &self,
        ctx: &OpContext,
        actor: &Actor,
        role_id: RoleId,
        user_id: UserId,
        source: &str,
    ) -> Result<()> {
        check_admin(actor)?;
        self.commit_as(ctx, actor, "unassign_sourced_role", |tx, _| {
            let role = assigned_role(tx, actor, &role_id, &user_id)?;
            if role.source.as_deref() != Some(source) {
                return Err(Error::UndesirableOperation(format!("role {role_id} is not managed by {source}")));
            }
            tx.unassign_role(&role.id, &user_id)?;
            Ok(())
        })
    }
}

/// Guests may read the tree but never change it
pub(crate) fn check_actor(actor: &Actor) -> Result<()> {
    if actor.is_guest {
        return Err(Error::InvalidState(format!("guest {} cannot change pages or roles", actor.user_id)));
    }
    Ok(())
}

/// Role membership is managed by space admins
fn check_admin(actor: &Actor) -> Result<()> {
    if !actor.is_admin {
        return Err(Error::InsecureOperation(format!(
            "user {} is not an admin of space {}",
            actor.user_id, actor.space_id
        )));
    }
    Ok(())
}

fn scoped_role(tx: &Tx<'_>, actor: &Actor, id: &RoleId) -> Result<Role> {
    match tx.role(id)? {
        Some(role) if role.space_id == actor.space_id => Ok(role),
        _ => Err(Error::not_found("role", id)),
    }
}

fn assigned_role(tx: &Tx<'_>, actor: &Actor, role_id: &RoleId, user_id: &UserId) -> Result<Role> {
    let role = scoped_role(tx, actor, role_id)?;
    if tx.role_assignment(&role.id, user_id)?.is_none() {
        return Err(Error::InvalidInput(format!("user {user_id} does not hold role {role_id}")));
    }
    Ok(role)
}

fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

// ============================================================================
// Permission entry policy
// ============================================================================

/// Whether `assignee` may be granted `level` on a page of `space`
pub(crate) fn validate_grant(
    tx: &Tx<'_>,
    space: &SpaceId,
    assignee: &PermissionAssignee,
    level: PermissionLevel,
) -> Result<()> {
    if !assignee.allows(level) {
        return Err(Error::InvalidInput(format!("{assignee} entries are limited to view, got {level}")));
    }
    match assignee {
        PermissionAssignee::Public => Ok(()),
        PermissionAssignee::Space { id } if id == space => Ok(()),
        PermissionAssignee::Space { id } => {
            Err(Error::InsecureOperation(format!("space {id} cannot be granted access to pages of {space}")))
        }
        PermissionAssignee::Role { id } => match tx.role(id)? {
            Some(role) if role.space_id == *space => Ok(()),
            _ => Err(Error::InsecureOperation(format!("role {id} does not belong to space {space}"))),
        },
        PermissionAssignee::User { id } => {
            if tx.membership(space, id)?.is_none() {
                return Err(Error::InsecureOperation(format!("user {id} is not a member of space {space}")));
            }
            Ok(())
        }
    }
}

/// Generic upsert may not touch integration-managed entries defined on the
/// page. Inherited copies of them can be overridden.
pub(crate) fn check_generic_write(entry: &PermissionEntry) -> Result<()> {
    match &entry.source {
        Some(source) if entry.is_local() => Err(Error::UndesirableOperation(format!(
            "permission {} is managed by {source}",
            entry.id
        ))),
        _ => Ok(()),
    }
}

/// An integration may write over its own entries and over inherited copies,
/// never over entries defined by someone else
pub(crate) fn check_sourced_write(entry: &PermissionEntry, source: &str) -> Result<()> {
    if entry.is_local() && entry.source.as_deref() != Some(source) {
        return Err(Error::UndesirableOperation(format!(
            "permission {} is not managed by {source}",
            entry.id
        )));
    }
    Ok(())
}

/// Generic removal: only unmanaged, locally-defined entries
pub(crate) fn check_removable(entry: &PermissionEntry) -> Result<()> {
    check_generic_write(entry)?;
    check_local(entry)
}

pub(crate) fn check_sourced_removal(entry: &PermissionEntry, source: &str) -> Result<()> {
    if entry.source.as_deref() != Some(source) {
        return Err(Error::UndesirableOperation(format!(
            "permission {} is not managed by {source}",
            entry.id
        )));
    }
    check_local(entry)
}

fn check_local(entry: &PermissionEntry) -> Result<()> {
    match entry.inherited_from {
        None => Ok(()),
        Some(origin) => Err(Error::UndesirableOperation(format!(
            "permission {} is inherited from {origin}; remove or override it at its source",
            entry.id
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::GUILD_XYZ_SOURCE;

    fn entry(inherited_from: Option<PermissionId>, source: Option<&str>) -> PermissionEntry {
        PermissionEntry {
            id: new_id().unwrap(),
            page_id: new_id().unwrap(),
            space_id: new_id().unwrap(),
            assignee: PermissionAssignee::Public,
            level: PermissionLevel::View,
            inherited_from,
            source: source.map(str::to_string),
        }
    }

    #[test]
    fn guests_only_read() {
        let actor = Actor { is_guest: true, ..Actor::member(new_id().unwrap(), new_id().unwrap()) };
        assert!(matches!(check_actor(&actor), Err(Error::InvalidState(_))));
        assert!(check_actor(&Actor::member(actor.user_id, actor.space_id)).is_ok());
    }

    #[test]
    fn role_changes_need_an_admin() {
        let member = Actor::member(new_id().unwrap(), new_id().unwrap());
        assert!(matches!(check_admin(&member), Err(Error::InsecureOperation(_))));
        assert!(check_admin(&Actor::admin(member.user_id, member.space_id)).is_ok());
    }

    #[test]
    fn local_unmanaged_entries_are_removable() {
        assert!(check_removable(&entry(None, None)).is_ok());
    }

    #[test]
    fn inherited_entries_are_not_removable() {
        let err = check_removable(&entry(Some(new_id().unwrap()), None)).unwrap_err();
        assert!(matches!(err, Error::UndesirableOperation(_)));
    }

    #[test]
    fn managed_entries_need_their_source() {
        let managed = entry(None, Some(GUILD_XYZ_SOURCE));
        assert!(matches!(check_removable(&managed), Err(Error::UndesirableOperation(_))));
        assert!(matches!(check_sourced_removal(&managed, "other"), Err(Error::UndesirableOperation(_))));
        assert!(check_sourced_removal(&managed, GUILD_XYZ_SOURCE).is_ok());
        assert!(check_sourced_removal(&entry(None, None), GUILD_XYZ_SOURCE).is_err());
    }

    #[test]
    fn inherited_copies_of_managed_entries_can_be_overridden() {
        let copy = entry(Some(new_id().unwrap()), Some(GUILD_XYZ_SOURCE));
        assert!(check_generic_write(&copy).is_ok());
        assert!(check_generic_write(&entry(None, Some(GUILD_XYZ_SOURCE))).is_err());
    }

    #[test]
    fn sourced_writes_stay_within_their_integration() {
        assert!(check_sourced_write(&entry(None, Some(GUILD_XYZ_SOURCE)), GUILD_XYZ_SOURCE).is_ok());
        assert!(check_sourced_write(&entry(Some(new_id().unwrap()), None), GUILD_XYZ_SOURCE).is_ok());
        let err = check_sourced_write(&entry(None, None), GUILD_XYZ_SOURCE).unwrap_err();
        assert!(matches!(err, Error::UndesirableOperation(_)));
        assert!(check_sourced_write(&entry(None, Some("other_sync")), GUILD_XYZ_SOURCE).is_err());
    }
}
