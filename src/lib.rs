pub mod config;
pub mod database;
pub mod engine;
pub mod errors;
pub mod jobs;
pub mod models;
pub mod services;
pub mod utils;
pub mod web;
