// src/handlers/mod.rs
pub mod auth;
pub mod billing;
pub mod chat;
