//! corral-core -- shared types, configuration, and the durable task store
//! for the corral coordination system.

pub mod config;
pub mod task_store;
pub mod types;
