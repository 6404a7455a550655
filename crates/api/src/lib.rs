//! HTTP API: the owning service's identity endpoints and the reusable
//! authentication / permission middleware stages.

pub mod app;
pub mod context;
pub mod middleware;
