// src/services/mod.rs
pub mod quota;
pub mod turn;
pub mod usage;
