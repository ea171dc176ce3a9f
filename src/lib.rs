pub mod api;
pub mod assistant;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
