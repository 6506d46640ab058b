//! Realtime conversation-sync core.
//!
//! Keeps local view state consistent with the live, multi-writer message
//! collection: the contact index (who have I talked to), the active thread
//! transcript, presence derived from last-activity freshness, message
//! dispatch, and the session heartbeat.

pub mod dispatch;
pub mod heartbeat;
pub mod index;
pub mod presence;
pub mod thread;

pub use dispatch::DispatchError;
pub use heartbeat::Heartbeat;
pub use index::ContactFeed;
pub use thread::{ActiveThread, ThreadFeed, ThreadKey, ThreadUpdate, Transcript, TranscriptRow};
