//! In-memory reference store.
//!
//! [`GraphStore`] holds committed records; [`MemoryStorageEngine`] turns
//! transaction state into commands and applies committed batches through
//! the explicit index, store and counts appliers, in that order.

mod appliers;
mod engine;
mod extract;
mod graph;

pub use appliers::{CountsApplier, ExplicitIndexApplier, StoreApplier};
pub use engine::MemoryStorageEngine;
pub use graph::{GraphStore, StoreIdReservations};
