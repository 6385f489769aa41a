//! Google Calendar mirroring and backup for calmirror.
//!
//! Provides the Calendar API client, pure event transforms, the sync-token
//! property store and the sync/backup orchestrator.

pub mod client;
pub mod error;
pub mod retry;
pub mod store;
pub mod sync;
pub mod transform;
pub mod types;

pub use client::{CalendarClient, EventQuery};
pub use error::CalendarError;
pub use retry::RetryConfig;
pub use store::{MemoryPropertyStore, PropertyStore, SqlitePropertyStore};
pub use sync::{sync_token_key, CalendarSync, ChangeSet, Outcome, SyncReport};
pub use types::{
    AccessRole, Attendee, Calendar, Event, EventDateTime, EventListResponse, EventStatus,
    ExtendedProperties, Organizer, ResponseStatus, Visibility,
};
