//! Runtime shell for push-based sync.

pub mod dispatcher;

#[cfg(test)]
mod tests;

pub use dispatcher::{ChangeDispatcher, ChannelStatus};
