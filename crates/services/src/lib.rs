#![forbid(unsafe_code)]

pub mod coach;
pub mod config;
pub mod error;
pub mod http_gateway;
pub mod hype;
pub mod participant;
pub mod sync;

pub use live_core::Clock;

pub use coach::CoachService;
pub use config::SyncConfig;
pub use error::{ConfigError, LiveClientError};
pub use http_gateway::{HttpConfig, HttpLiveClassGateway};
pub use hype::{HypeKind, HypeMessage, HypeNotifier};
pub use participant::{LiveView, ParticipantController, SessionPhase, StepReport};
pub use sync::LiveSync;
