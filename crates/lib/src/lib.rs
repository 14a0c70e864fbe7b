//! machan core library: conversation store, response coordinator, media encoding,
//! and the streaming model client used by the CLI.

pub mod config;
pub mod conversation;
pub mod coordinator;
pub mod init;
pub mod llm;
pub mod media;

pub use conversation::{Conversation, Message, MessageId, Sender};
pub use coordinator::{Coordinator, OutboundMessage, PendingImage, SendOutcome};
pub use media::{Media, MediaRef, Part};
