//! HTTP admission middleware and the server that hosts it.

mod client;
mod middleware;
mod server;

pub use client::{forwarded_client, is_public_unicast, ClientAddress};
pub use middleware::{
    AdmissionLayer, AdmissionService, LimitExceeded, HEADER_RATE_LIMIT_DURATION,
    HEADER_RATE_LIMIT_FORWARDED_FOR, HEADER_RATE_LIMIT_REMAINING, HEADER_RATE_LIMIT_REMOTE_ADDR,
    HEADER_RATE_LIMIT_TOTAL,
};
pub use server::{build_router, GatewayServer};
