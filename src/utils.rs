//! Utility functions shared across the service

pub mod datetime;

pub use datetime::DateTimeParser;
