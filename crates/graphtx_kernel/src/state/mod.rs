//! Transaction state: diff sets, count deltas and the per-transaction overlay.

mod counts;
mod diff_set;
mod tx_state;

pub use counts::{CountsKey, CountsRecordState, Difference};
pub use diff_set::{DiffApply, DiffSet};
pub use tx_state::{
    ExplicitIndexChange, PropertyChanges, PropertyOverlay, RelationshipRecord, TransactionState,
    TxStateVisitor,
};
