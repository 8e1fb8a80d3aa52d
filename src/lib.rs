// Library root: re-exports all modules so integration tests and external
// consumers can access the crate's public API.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod presence;
pub mod routes;
pub mod state;
pub mod tmdb;
pub mod ws_server;
