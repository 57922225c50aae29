// handlers/protected/mod.rs - Endpoints behind the auth middleware
//
// Every handler here can rely on the Principal, ClientAddress and
// RateLimitStatus extensions having been attached.

pub mod proxy;

pub use proxy::proxy;
