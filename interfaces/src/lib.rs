pub mod defs;
pub mod sink;

pub use defs::{content_fingerprint, EventType, KnowledgeEvent, Manifest, NoteRid};
pub use sink::{ChannelSink, KnowledgeSink, LogSink};
