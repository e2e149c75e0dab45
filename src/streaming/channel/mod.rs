//! Push channel providers: per-collection change subscriptions.

pub mod api;
pub mod local;
pub mod mock;
pub mod realtime;
pub mod router;

pub use api::{
    ChannelError, ChannelEvent, ChannelHandle, ChannelSpec, PushChannelProvider, Subscription,
    TaskHandle,
};
pub use local::LocalChangeFeed;
pub use mock::{MockChannelProvider, MockFailure};
pub use realtime::RealtimeChannelProvider;
pub use router::ChannelRouter;
