pub mod api;
pub mod config;
pub mod error;
pub mod github;
pub mod models;
pub mod report;
pub mod repository;
pub mod services;
pub mod state;
