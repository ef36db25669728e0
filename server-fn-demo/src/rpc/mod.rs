//! App RPC - Types, Services, and Server Functions

mod context;
mod handlers;
mod types;

pub use context::*;
pub use handlers::*;
pub use types::*;
