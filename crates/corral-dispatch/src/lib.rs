//! corral-dispatch -- routing, dispatch, result ingestion, and the facade
//! that ties the coordination core together.

pub mod channel;
pub mod classifier;
pub mod dispatcher;
pub mod facade;
pub mod ingestor;
