//! Rate limiting logic and state management.

pub mod client;
pub mod policy;
pub mod reaper;
pub mod routes;
pub mod store;

mod key;
mod limiter;
mod window;

pub use client::ClientResolver;
pub use key::ClientKey;
pub use limiter::{Decision, RateLimiter};
pub use policy::{Policy, PolicyConfig, PolicyTable};
pub use reaper::{Reaper, ReaperHandle};
pub use routes::{RouteRule, RouteTable};
pub use store::{MemoryStore, WindowStore};
pub use window::{now_millis, Window};
