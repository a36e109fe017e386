//! Apache-style directory listings for a cloud download account.
//!
//! Requests pass a rate limiter, fetch containers through a caching and
//! retrying upstream client, run through the filter/sort engine and are
//! rendered as HTML.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod render;
pub mod routes;
pub mod services;
pub mod state;

pub use routes::routes::routes;
pub use state::AppState;
