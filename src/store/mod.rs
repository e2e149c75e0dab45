//! Record store adapter and the backends behind it.

pub mod api;
pub mod hosted;
pub mod local;
pub mod mock;
pub mod selector;


pub use api::{ActivityMarker, BackendKind, RecordBackend};
pub use hosted::HostedStore;
pub use local::LocalStore;
pub use mock::MockBackend;
pub use selector::RecordStore;
