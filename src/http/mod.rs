//! HTTP surface: router, auth middleware, REST endpoints

pub mod middleware;
pub mod routes;

pub use routes::build_router;
