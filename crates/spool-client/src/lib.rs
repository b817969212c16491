//! Consumer side of Spool's live updates.
//!
//! A host site reacts to content changes either by mounting the signed
//! webhook receiver or by polling the pull endpoint. Both paths hand each
//! change to the same [`ChangeHandler`].

pub mod config;
pub mod consumer;
pub mod error;
pub mod handler;
pub mod poller;
pub mod pull;
pub mod webhook;

pub use config::{ConfigError, SpoolConfig};
pub use consumer::{SpoolConsumer, DEFAULT_WEBHOOK_PATH};
pub use error::ClientError;
pub use handler::{
    handler_fn, invalidation_paths, ChangeHandler, FnHandler, HandlerError, InvalidatingHandler,
    InvalidationReport, Revalidator,
};
pub use poller::{spawn_poller, ChangeTracker, ConsumerState, PollerHandle, SweepOutcome};
pub use pull::{ContentUpdates, PullClient, UpdateSource};
pub use webhook::{DeliveryLog, WebhookReceiver};

pub use spool_core::{ContentEvent, ContentEventKind, ContentUpdate};
