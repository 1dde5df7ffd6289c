//! corral-agents -- the agent registry, descriptor loading, and the bridge
//! integrations that connect the coordination core to each worker kind.

pub mod bridge;
pub mod descriptor;
pub mod registry;
