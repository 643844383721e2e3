//! Attachment harvester library.
//!
//! Lists a creator's posts on an upstream content site, finds the files of
//! one extension attached to each post, and downloads them into a flat
//! directory under rate limits, with an HTTP API for a browsing UI.

pub mod api;
pub mod client;
pub mod config;
pub mod constants;
pub mod download;
pub mod error;
pub mod queue;
pub mod rate_limiter;
pub mod upstream;
pub mod web;

pub use error::{Error, Result};
