//! Core data models for the listing service.
//!
//! Containers and files are the normalized entity model produced by the
//! upstream client; listing rows are what the renderer consumes.

pub mod container;
pub mod listing;
pub mod source;
