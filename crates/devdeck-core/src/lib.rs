//! DevDeck Core - Media playback orchestration
//!
//! This crate provides the playback side of the command center: the track
//! queue and its loop rules, stream resolution through an external
//! extractor, the control channel to an external player, single-track
//! sessions, and the orchestrator that sequences them.

pub mod channel;
pub mod command;
pub mod config;
pub mod orchestrator;
pub mod protocol;
pub mod queue;
pub mod resolver;
pub mod search;
pub mod session;

pub use channel::{ ChannelError, ControlChannel, IpcEndpoint };
pub use command::{ Command, CommandError };
pub use config::PlayerConfig;
pub use orchestrator::{ BackgroundStart, OrchestratorError, PlaybackOrchestrator, RunEnd, RunMode };
pub use protocol::{ ChannelEvent, ControlCommand };
pub use queue::{ LoopMode, Queue, QueueError, Track };
pub use resolver::{ Resolve, ResolveError, StreamResolver };
pub use search::{ SearchError, Searcher };
pub use session::{
    Detached, Frontend, NowPlaying, PlaybackSession, PlayerRunner, SessionControl, SessionError,
    SessionOutcome, SessionRunner, SessionState,
};
