//! Error types for the graphtx kernel.

use crate::locking::ResourceType;
use crate::schema::SchemaDescriptor;
use crate::transaction::{AccessMode, TerminationReason};
use crate::types::{EntityRef, PropertyKeyId, TransactionId};
use std::io;
use thiserror::Error;

/// Result type for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

/// Errors that can occur in kernel operations.
#[derive(Debug, Error)]
pub enum KernelError {
    /// An index over the schema already exists.
    #[error("there already exists an index {schema}")]
    AlreadyIndexed {
        /// The offending schema.
        schema: SchemaDescriptor,
    },

    /// A uniqueness constraint over the schema already exists.
    #[error("there already exists a constraint {schema}")]
    AlreadyConstrained {
        /// The offending schema.
        schema: SchemaDescriptor,
    },

    /// The index to drop does not exist.
    #[error("no such index {schema}")]
    NoSuchIndex {
        /// The requested schema.
        schema: SchemaDescriptor,
    },

    /// The constraint to drop does not exist.
    #[error("no such constraint {schema}")]
    NoSuchConstraint {
        /// The requested schema.
        schema: SchemaDescriptor,
    },

    /// The index backs a uniqueness constraint and must be dropped through it.
    #[error("index {schema} belongs to a constraint and cannot be dropped on its own")]
    IndexBelongsToConstraint {
        /// The schema of the constraint-owned index.
        schema: SchemaDescriptor,
    },

    /// A label, relationship type or property key name was rejected.
    #[error("illegal token name {name:?}: {reason}")]
    IllegalTokenName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A composite schema mentions the same property twice.
    #[error("property {property} is repeated in composite schema {schema}")]
    RepeatedPropertyInCompositeSchema {
        /// The rejected schema.
        schema: SchemaDescriptor,
        /// The repeated property.
        property: PropertyKeyId,
    },

    /// The transaction's access mode does not permit the operation.
    #[error("{operation} is not allowed in {mode} mode")]
    AccessModeViolation {
        /// Mode the transaction was started with.
        mode: AccessMode,
        /// What was attempted.
        operation: &'static str,
    },

    /// Data and schema writes were mixed in one transaction.
    #[error("invalid transaction type: {message}")]
    InvalidTransactionType {
        /// Description of the conflict.
        message: String,
    },

    /// The transaction was terminated.
    #[error("transaction terminated: {reason}")]
    TransactionTerminated {
        /// Why it was terminated.
        reason: TerminationReason,
    },

    /// The transaction was marked successful but rolled back anyway.
    #[error("transaction rolled back even though it was marked as successful")]
    TransactionMarkedAsFailed,

    /// The transaction is not open.
    #[error("transaction is not open")]
    TransactionNotOpen,

    /// The lock client was stopped while acquiring a lock.
    #[error("lock client stopped")]
    LockClientStopped,

    /// A lock could not be acquired in time.
    #[error("timed out after {waited_millis}ms waiting for {resource} lock on {id}")]
    LockAcquisitionTimeout {
        /// Resource type of the lock.
        resource: ResourceType,
        /// Resource id of the lock.
        id: u64,
        /// How long the caller waited.
        waited_millis: u64,
    },

    /// Waiting for the lock would deadlock with other transactions.
    #[error("deadlock detected waiting for {resource} lock on {id}")]
    DeadlockDetected {
        /// Resource type of the lock.
        resource: ResourceType,
        /// Resource id of the lock.
        id: u64,
    },

    /// The entity does not exist.
    #[error("entity not found: {entity}")]
    EntityNotFound {
        /// The missing entity.
        entity: EntityRef,
    },

    /// Appending a transaction failed after its id was assigned.
    #[error("could not append transaction {tx_id} to the log")]
    AppendFailed {
        /// The id that was assigned to the transaction.
        tx_id: TransactionId,
        /// The underlying failure.
        #[source]
        source: Box<KernelError>,
    },

    /// Applying an appended transaction to storage failed.
    #[error("could not apply transaction {tx_id} to the store after it was written to the log")]
    ApplyFailed {
        /// The appended transaction.
        tx_id: TransactionId,
        /// The underlying failure.
        #[source]
        source: Box<KernelError>,
    },

    /// The kernel is shut down or stopped.
    #[error("kernel is shut down")]
    Shutdown,

    /// Too many transactions are active.
    #[error("maximum number of concurrent transactions ({max}) reached")]
    MaxActiveTransactionsReached {
        /// Configured limit.
        max: usize,
    },

    /// New transactions are blocked.
    #[error("new transactions are currently blocked")]
    NewTransactionsBlocked,

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// Serialization of a transaction failed.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// A transaction log frame is malformed.
    #[error("transaction log corruption: {message}")]
    LogCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum verification failed.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Checksum stored in the frame.
        expected: u32,
        /// Checksum computed over the frame.
        actual: u32,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl KernelError {
    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an invalid transaction type error.
    pub fn invalid_transaction_type(message: impl Into<String>) -> Self {
        Self::InvalidTransactionType {
            message: message.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a log corruption error.
    pub fn log_corruption(message: impl Into<String>) -> Self {
        Self::LogCorruption {
            message: message.into(),
        }
    }

    /// Creates a terminated error.
    pub fn terminated(reason: TerminationReason) -> Self {
        Self::TransactionTerminated { reason }
    }

    /// Returns `true` for schema-integrity violations.
    ///
    /// These are raised before any write reaches storage and are never worth
    /// retrying.
    #[must_use]
    pub fn is_schema_violation(&self) -> bool {
        matches!(
            self,
            Self::AlreadyIndexed { .. }
                | Self::AlreadyConstrained { .. }
                | Self::NoSuchIndex { .. }
                | Self::NoSuchConstraint { .. }
                | Self::IndexBelongsToConstraint { .. }
                | Self::IllegalTokenName { .. }
                | Self::RepeatedPropertyInCompositeSchema { .. }
        )
    }

    /// Returns `true` if the error was caused by transaction termination.
    #[must_use]
    pub fn is_termination(&self) -> bool {
        matches!(
            self,
            Self::TransactionTerminated { .. } | Self::LockClientStopped
        )
    }
}
