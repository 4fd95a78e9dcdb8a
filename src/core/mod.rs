//! Core module - Configuration, preferences and observable state

pub mod config;
pub mod preferences;
pub mod state;
