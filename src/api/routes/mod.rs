//! HTTP route handlers

pub mod connectivity;
pub mod health;
pub mod jobs;
pub mod realtime;
