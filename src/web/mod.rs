//! HTTP surface: REST routes plus the server-sent progress stream.

pub mod error;
pub mod routes;
pub mod stream;

pub use routes::create_router;
