//! HTTP route handlers

pub mod health;
pub mod ws;
