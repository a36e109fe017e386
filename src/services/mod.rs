//! Request-processing core: admission control, upstream access, and the
//! filter/sort engine.

pub mod cache;
pub mod filter;
pub mod rate_limiter;
pub mod retry;
pub mod sort;
pub mod upstream_service;
