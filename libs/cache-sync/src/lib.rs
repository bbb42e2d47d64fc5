//! Keeps a host application's polled query cache consistent with realtime pushes
//!
//! # Architecture
//!
//! ```text
//! broker ──MESSAGE──> RealtimeClient ──callback──> NotificationSync / ChatSync
//!                                                     │
//!                                                     ├─ cache.invalidate(key)
//!                                                     ├─ cache.force_refetch(key)   (once per event)
//!                                                     └─ unread.add_unread_message  (chat only)
//!
//! poll timer / focus / reconnect ───────────────────> cache.force_refetch(key)
//! ```
//!
//! Pushes make updates fast; polling keeps data eventually consistent when
//! pushes are lost.

mod chat;
mod collaborators;
mod config;
mod error;
mod helpers;
mod mount;
mod notifications;
mod stats;

pub use chat::ChatSync;
pub use collaborators::{CacheController, IdentityProvider, NoAlerts, StaticIdentity, SystemAlerter};
pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use helpers::QueryKey;
pub use mount::MountHandle;
pub use notifications::NotificationSync;
pub use stats::{StatsCollector, SyncStats};
