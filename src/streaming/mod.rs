//! Push-based sync: channel providers, the dispatch engine and its shell.

pub mod channel;
pub mod engine;
pub mod runtime;
pub mod types;

pub use engine::{ChannelState, DispatchEngine};
pub use runtime::{ChangeDispatcher, ChannelStatus};
pub use types::{ChangeNotification, ChangeOp};
