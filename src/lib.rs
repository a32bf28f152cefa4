pub mod api;
pub mod api_docs;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod notify;
pub mod realtime;
pub mod scheduler;
pub mod seed;
pub mod services;
pub mod state;
