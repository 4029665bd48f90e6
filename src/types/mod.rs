//! Type definitions

pub mod infra_task;
pub mod ingest;
pub mod messages;
pub mod task;
pub mod user;

pub use infra_task::*;
pub use ingest::*;
pub use messages::*;
pub use task::*;
pub use user::*;
