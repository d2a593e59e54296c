//! HTTP layer: router, auth middleware, error responses

pub mod middleware;
pub mod routes;

pub use routes::build_router;
