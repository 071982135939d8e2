//! Alerting core for the vigil monitoring server.
//!
//! Given periodic evaluation results for a set of named, tag-scoped alert
//! checks, the engine maintains per-check incident state, decides when a
//! human must be notified, suppresses flap noise, honors time-windowed
//! manual silences, batches unknown results into digest notifications, and
//! drives outbound delivery with retry and escalation.
//!
//! The engine consumes a status per alert key; computing that status is the
//! evaluation engine's job, reachable through the [`engine::Evaluator`]
//! seam. Delivery transports live in the `notify` crate.

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod events;
pub mod incident;
pub mod model;
pub mod policy;
pub mod render;
pub mod silence;
pub mod state;
pub mod unknown;

pub use config::Config;
pub use engine::{ActionKind, Engine, Evaluator};
pub use error::EngineError;
pub use events::{DeliveryEvent, DeliveryOutcome};
pub use model::{AlertKey, Event, RunHistory, Status};
