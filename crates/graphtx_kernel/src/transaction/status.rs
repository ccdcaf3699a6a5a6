//! Transaction status state machine.

use crate::error::{KernelError, KernelResult};
use crate::transaction::TerminationReason;

/// Lifecycle phase of a pooled transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Never used.
    NotInitialized,
    /// In use.
    Open,
    /// Committing or rolling back.
    Closing,
    /// Returned to the pool.
    Closed,
    /// Disposed; cannot be used again.
    ShutDown,
}

/// Phase plus an orthogonal termination reason.
///
/// A transaction may be closing and terminated at the same time. The reason
/// is cleared when the transaction is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionStatus {
    phase: Phase,
    termination: Option<TerminationReason>,
    committing: bool,
}

impl Default for TransactionStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionStatus {
    /// A status that was never initialized.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            phase: Phase::NotInitialized,
            termination: None,
            committing: false,
        }
    }

    /// Moves to `Open`. Valid from `NotInitialized` or `Closed`.
    pub fn init(&mut self) -> KernelResult<()> {
        match self.phase {
            Phase::NotInitialized | Phase::Closed => {
                self.phase = Phase::Open;
                self.termination = None;
                self.committing = false;
                Ok(())
            }
            Phase::ShutDown => Err(KernelError::Shutdown),
            Phase::Open | Phase::Closing => Err(KernelError::invalid_operation(
                "transaction is already in use",
            )),
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Returns `true` between `init` and `closing`.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self.phase, Phase::Open)
    }

    /// Returns `true` once closing has started.
    #[must_use]
    pub const fn is_closing(&self) -> bool {
        matches!(self.phase, Phase::Closing)
    }

    /// Returns `true` once fully closed or shut down.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self.phase, Phase::Closed | Phase::ShutDown)
    }

    /// Reason the transaction was terminated, if it was.
    #[must_use]
    pub const fn termination_reason(&self) -> Option<TerminationReason> {
        self.termination
    }

    /// Returns `true` once the commit point has been passed.
    #[must_use]
    pub const fn is_committing(&self) -> bool {
        self.committing
    }

    /// Records termination.
    ///
    /// Returns `false` if the transaction is not open or closing, is
    /// already terminated, or has passed its commit point.
    pub fn terminate(&mut self, reason: TerminationReason) -> bool {
        let live = matches!(self.phase, Phase::Open | Phase::Closing);
        if !live || self.termination.is_some() || self.committing {
            return false;
        }
        self.termination = Some(reason);
        true
    }

    /// Moves to `Closing`.
    pub fn closing(&mut self) -> KernelResult<()> {
        if !self.is_open() {
            return Err(KernelError::TransactionNotOpen);
        }
        self.phase = Phase::Closing;
        Ok(())
    }

    /// Passes the commit point. Fails with the termination reason if the
    /// transaction was terminated first.
    pub fn begin_commit(&mut self) -> KernelResult<()> {
        if let Some(reason) = self.termination {
            return Err(KernelError::terminated(reason));
        }
        self.committing = true;
        Ok(())
    }

    /// Moves to `Closed` and forgets termination.
    pub fn closed(&mut self) {
        self.phase = Phase::Closed;
        self.termination = None;
        self.committing = false;
    }

    /// Moves to `ShutDown`.
    pub fn shutdown(&mut self) {
        self.phase = Phase::ShutDown;
        self.termination = None;
        self.committing = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_open_only_between_init_and_close() {
        let mut status = TransactionStatus::new();
        assert!(!status.is_open());
        status.init().unwrap();
        assert!(status.is_open());
        status.closing().unwrap();
        assert!(!status.is_open());
        status.closed();
        assert!(!status.is_open());
        assert!(status.is_closed());
    }

    #[test]
    fn termination_reason_is_forgotten_on_close() {
        let mut status = TransactionStatus::new();
        status.init().unwrap();
        assert!(status.terminate(TerminationReason::Terminated));
        status.closing().unwrap();
        assert_eq!(status.termination_reason(), Some(TerminationReason::Terminated));
        status.closed();
        assert_eq!(status.termination_reason(), None);
    }

    #[test]
    fn termination_does_not_downgrade_reason() {
        let mut status = TransactionStatus::new();
        status.init().unwrap();
        assert!(status.terminate(TerminationReason::TransactionTimedOut));
        assert!(!status.terminate(TerminationReason::Terminated));
        assert_eq!(
            status.termination_reason(),
            Some(TerminationReason::TransactionTimedOut)
        );
    }

    #[test]
    fn cannot_terminate_closed_or_shut_down() {
        let mut status = TransactionStatus::new();
        assert!(!status.terminate(TerminationReason::Terminated));
        status.init().unwrap();
        status.closing().unwrap();
        status.closed();
        assert!(!status.terminate(TerminationReason::Terminated));
        status.shutdown();
        assert!(!status.terminate(TerminationReason::Terminated));
        assert!(matches!(status.init(), Err(KernelError::Shutdown)));
    }

    #[test]
    fn closing_transaction_can_be_terminated() {
        let mut status = TransactionStatus::new();
        status.init().unwrap();
        status.closing().unwrap();
        assert!(status.terminate(TerminationReason::Terminated));
    }

    #[test]
    fn commit_point_blocks_termination() {
        let mut status = TransactionStatus::new();
        status.init().unwrap();
        status.closing().unwrap();
        status.begin_commit().unwrap();
        assert!(!status.terminate(TerminationReason::Terminated));
    }

    #[test]
    fn terminated_transaction_cannot_pass_commit_point() {
        let mut status = TransactionStatus::new();
        status.init().unwrap();
        status.terminate(TerminationReason::DatabaseShutdown);
        status.closing().unwrap();
        let err = status.begin_commit().unwrap_err();
        assert!(matches!(
            err,
            KernelError::TransactionTerminated {
                reason: TerminationReason::DatabaseShutdown
            }
        ));
    }

    #[test]
    fn double_init_is_rejected() {
        let mut status = TransactionStatus::new();
        status.init().unwrap();
        assert!(status.init().is_err());
    }
}
