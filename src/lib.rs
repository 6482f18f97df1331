// src/lib.rs
pub mod access;
pub mod auth;
pub mod config;
pub mod db;
pub mod earnings;
pub mod engine;
pub mod error;
pub mod memory_store;
pub mod models;
pub mod payments;
pub mod paywall;
pub mod store;
pub mod subscription;

pub use engine::UsageEngine;
pub use error::{Error, Result};
