//! The standard statement layers.

mod auto_index;
mod caching;
mod locking;
mod validation;

pub use auto_index::{AutoIndexLayer, NODE_AUTO_INDEX};
pub use caching::CachingLayer;
pub use locking::LockingLayer;
pub use validation::ValidationLayer;
