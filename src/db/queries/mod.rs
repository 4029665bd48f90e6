//! Database queries

pub mod audit;
pub mod infra_task;
pub mod session;
pub mod task;
pub mod user;
