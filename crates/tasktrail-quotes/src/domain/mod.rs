//! Quote domain types and the repository contract.

pub mod commands;
pub mod models;
pub mod repository;
