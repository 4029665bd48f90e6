//! Business logic services

pub mod customer_name;
pub mod ingest;
