//! Per-operation context: who is acting, and for how long the operation may run

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
pub use tokio_util::sync::CancellationToken as CancelToken;

use crate::error::{Error, Result};
use crate::model::{SpaceId, UserId};

/// Actor as supplied by the tenant/session provider. Trusted as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub space_id: SpaceId,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub is_guest: bool,
}

impl Actor {
    pub fn member(user_id: UserId, space_id: SpaceId) -> Self {
        Actor { user_id, space_id, is_admin: false, is_guest: false }
    }

    pub fn admin(user_id: UserId, space_id: SpaceId) -> Self {
        Actor { is_admin: true, ..Actor::member(user_id, space_id) }
    }
}

/// Deadline and cancellation for one structural mutation.
///
/// Checked before every store call inside a transaction; a failed check
/// aborts the transaction.
#[derive(Debug, Clone)]
pub struct OpContext {
    started: Instant,
    timeout: Duration,
    cancel: CancelToken,
}

impl OpContext {
    pub fn with_timeout(timeout: Duration) -> Self {
        OpContext { started: Instant::now(), timeout, cancel: CancelToken::new() }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[inline]
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if self.started.elapsed() >= self.timeout {
            return Err(Error::Timeout(self.timeout));
        }
        Ok(())
    }
}
