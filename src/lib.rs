//! Client library for a room-rental marketplace backed by a hosted
//! Postgres/auth/storage service.
//!
//! Listing search with debounced keywords and paged results, room details,
//! account flows and the admin listing editor all talk to the backend through
//! the collaborator traits in [`backend`].

pub mod admin;
pub mod auth;
pub mod backend;
pub mod config;
pub mod listing;
pub mod models;
pub mod routes;

pub use config::Config;
