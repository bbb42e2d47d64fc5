//! Interfaces to the host application

use crate::error::Result;
use crate::helpers::QueryKey;

/// The host's polled query cache
pub trait CacheController: Send + Sync {
    /// Mark `key` stale; does not by itself trigger a fetch
    fn invalidate(&self, key: &QueryKey);

    /// Request an immediate refetch of `key`
    fn force_refetch(&self, key: &QueryKey);
}

pub trait IdentityProvider: Send + Sync {
    /// Id of the signed-in user, if any
    fn current_user_id(&self) -> Option<String>;
}

/// Transient OS-level notifications
pub trait SystemAlerter: Send + Sync {
    fn permission_granted(&self) -> bool;

    fn show(&self, title: &str, body: &str) -> Result<()>;
}

/// Identity fixed at construction
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(Option<String>);

impl StaticIdentity {
    pub fn new(user_id: impl ToString) -> Self {
        Self(Some(user_id.to_string()))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user_id(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Alerter for hosts without system notifications
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAlerts;

impl SystemAlerter for NoAlerts {
    fn permission_granted(&self) -> bool {
        false
    }

    fn show(&self, _title: &str, _body: &str) -> Result<()> {
        Ok(())
    }
}
