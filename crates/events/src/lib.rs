//! Flowline event plumbing.
//!
//! - [`EventBus`] is the in-process publish/subscribe hub for
//!   [`PlatformEvent`]s, backed by `tokio::sync::broadcast`.
//! - [`WebhookResponseWatcher`] correlates synchronous webhook callers with
//!   the reply computed by a run, possibly in another process, through a
//!   [`ResponseBroker`].
//! - [`PgNotifyBroker`] carries those replies across processes with Postgres
//!   `LISTEN/NOTIFY`.

pub mod bus;
pub mod pg_notify;
pub mod webhook;

pub use bus::{EventBus, PlatformEvent};
pub use pg_notify::PgNotifyBroker;
pub use webhook::{
    InMemoryBroker, PendingResponse, ResponseBroker, WebhookResponseMessage,
    WebhookResponseWatcher,
};
