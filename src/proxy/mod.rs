pub mod client;
pub mod context;
mod handler;

pub use client::{build_origin_client, OriginClient};
pub use context::{full_body, BoxBody};
pub use handler::handle_request;
