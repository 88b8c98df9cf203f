//! Database handles and the LMDB environment

use byteorder::BigEndian;
use heed::types::{Bytes, SerdeJson, Str, Unit, U64};
use heed::{Database, Env, EnvOpenOptions, RoTxn};

use crate::config::StorageConfig;
use crate::constants::*;
use crate::context::OpContext;
use crate::error::Result;
use crate::model::{Membership, Page, PermissionEntry, Role, Space, User};
use crate::tx::Tx;

// Database type aliases
pub type Table<T> = Database<Bytes, SerdeJson<T>>;
pub type Index = Database<Bytes, Unit>;
pub type Stamps = Database<Bytes, U64<BigEndian>>;

/// All database handles
pub struct Dbs {
    pub spaces: Table<Space>,
    pub users: Table<User>,
    /// [space][user] -> membership
    pub memberships: Table<Membership>,
    pub roles: Table<Role>,
    /// [role][user] -> assigned at (unix millis)
    pub role_assignments: Stamps,
    pub pages: Table<Page>,
    /// [parent][child]
    pub children: Index,
    pub permissions: Table<PermissionEntry>,
    /// [page][assignee] -> permission id. One row per assignee per page.
    pub page_permissions: Database<Bytes, Bytes>,
    /// [origin][inheriting permission]
    pub inheritors: Index,
    pub meta: Database<Str, U64<BigEndian>>,
}

/// An opened LMDB environment with its tables
pub struct Store {
    env: Env,
    dbs: Dbs,
}

impl Store {
    /// Open (or create) the environment at `config.path`
    pub fn open(config: &StorageConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.path)?;
        // SAFETY: LMDB requires that the same environment is not opened twice in
        // one process; the store owns the only handle to this path.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(config.map_size)
                .max_readers(config.max_readers)
                .max_dbs(MAX_DBS)
                .open(&config.path)?
        };
        let mut tx = env.write_txn()?;
        let dbs = Dbs {
            spaces: env.create_database(&mut tx, Some(DB_SPACES))?,
            users: env.create_database(&mut tx, Some(DB_USERS))?,
            memberships: env.create_database(&mut tx, Some(DB_MEMBERSHIPS))?,
            roles: env.create_database(&mut tx, Some(DB_ROLES))?,
            role_assignments: env.create_database(&mut tx, Some(DB_ROLE_ASSIGNMENTS))?,
            pages: env.create_database(&mut tx, Some(DB_PAGES))?,
            children: env.create_database(&mut tx, Some(DB_CHILDREN))?,
            permissions: env.create_database(&mut tx, Some(DB_PERMISSIONS))?,
            page_permissions: env.create_database(&mut tx, Some(DB_PAGE_PERMISSIONS))?,
            inheritors: env.create_database(&mut tx, Some(DB_INHERITORS))?,
            meta: env.create_database(&mut tx, Some(DB_META))?,
        };
        tx.commit()?;
        tracing::debug!(path = %config.path.display(), "opened page store");
        Ok(Store { env, dbs })
    }

    /// Execute a read-only operation on a consistent snapshot
    #[inline]
    pub fn read<T, F: FnOnce(&Dbs, &RoTxn) -> Result<T>>(&self, f: F) -> Result<T> {
        let txn = self.env.read_txn()?;
        f(&self.dbs, &txn)
    }

    /// Run multiple operations in a single write transaction.
    ///
    /// Commits only if `f` succeeds; any error (including a timeout or
    /// cancellation observed by `ctx`) drops the transaction uncommitted.
    pub fn transact<T, F: FnOnce(&mut Tx<'_>) -> Result<T>>(&self, ctx: &OpContext, f: F) -> Result<T> {
        ctx.check()?;
        let mut tx = Tx::new(self.env.write_txn()?, &self.dbs, ctx.clone());
        let r = f(&mut tx)?;
        tx.commit()?;
        Ok(r)
    }
}
