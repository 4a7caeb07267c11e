//! Two-party call orchestration core.
//!
//! The host application owns the signaling transport and the UI; this crate
//! owns the negotiation state machine, the local media track lifecycle, and
//! the single peer connection of a call. Inbound signaling messages and local
//! commands are serialized through one task (see [`CallOrchestrator::run`]),
//! so no two state transitions ever interleave.

pub mod candidates;
pub mod error;
pub mod media;
pub mod orchestrator;
pub mod session;
pub mod signaling;

mod peer;

pub use candidates::CandidateBuffer;
pub use error::CallError;
pub use media::{MediaDevices, MediaKind, MediaTrackManager, SampleDevices, UserMedia, VideoSource};
pub use orchestrator::{CallCommand, CallEvent, CallOrchestrator};
pub use session::{ConnectionState, Session};
pub use signaling::SignalingChannel;
