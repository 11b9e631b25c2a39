#![forbid(unsafe_code)]

pub mod gateway;
pub mod memory;

pub use gateway::{
    AdvanceOutcome, ChangeFeed, ChangeKind, ChangeNotice, CoachGateway, GatewayError,
    LiveClassGateway, PartialOutcome, SessionSnapshot,
};
pub use memory::{InMemoryLiveServer, ParticipantConnection};
