pub mod identity;
pub mod topics;

pub use identity::*;
pub use topics::{ChannelKind, ParsedTopic};
