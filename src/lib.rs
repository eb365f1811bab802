//! Messaging core for a community application.
//!
//! Covers conversation discovery with unread accounting, idempotent team
//! conversation provisioning, message store access with profile enrichment,
//! best-effort presence tracking, and a retry/backoff policy for store reads.
//! The backing store is an external collaborator behind the repository traits
//! in [`domain::repository`]; Postgres and in-memory implementations ship in
//! [`infrastructure::persistence`].

pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod retry;
pub mod telemetry;

pub use config::MessagingConfig;
pub use domain::repository::ClientContext;
pub use domain::service::{
    ConversationDirectory, MessageService, PresenceTracker, TeamConversationProvisioner,
    Visibility,
};
pub use error::{StoreError, StoreResult};
pub use retry::RetryPolicy;
