//! Identity providers for the two backends.

pub mod api;
pub mod hosted;
pub mod local;
pub mod router;

pub use api::{AuthProvider, Session, UserIdentity};
pub use hosted::HostedAuth;
pub use local::{LocalAuth, LOCAL_USER_ID};
pub use router::AuthRouter;
