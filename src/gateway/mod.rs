//! HTTP gateway: rate limiting adapter, upstream forwarding and the server.

mod adapter;
mod server;
mod upstream;

pub use adapter::{
    Admission, Denial, RateLimitGuard, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING,
    X_RATELIMIT_RESET,
};
pub use server::{handle, GatewayServer, HEALTH_PATH};
pub use upstream::{ProxyUpstream, ResponseBody, Upstream};
