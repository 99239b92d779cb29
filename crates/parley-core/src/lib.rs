//! Core types, config, errors, and the conversation store for Parley.

pub mod config;
pub mod error;
pub mod history;
pub mod persona;
pub mod types;
