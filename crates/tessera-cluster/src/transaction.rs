//! All-or-nothing batches of path changes.

use std::sync::Arc;

use tessera_admin::{BlockError, PathBlocker};
use tracing::{debug, warn};

use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PathChange {
    Block,
    Unblock,
}

impl PathChange {
    fn inverse(self) -> Self {
        match self {
            PathChange::Block => PathChange::Unblock,
            PathChange::Unblock => PathChange::Block,
        }
    }

    fn send(self, blocker: &dyn PathBlocker, from_port: u16, to_port: u16) -> std::result::Result<(), BlockError> {
        match self {
            PathChange::Block => blocker.block(from_port, to_port),
            PathChange::Unblock => blocker.unblock(from_port, to_port),
        }
    }
}

/// Path changes of one operation.
///
/// Dropping an uncommitted transaction undoes the changes it applied, last
/// first, so an error returned with `?` halfway through leaves the paths as
/// they were.
pub(crate) struct PathTransaction {
    blocker: Arc<dyn PathBlocker>,
    change: PathChange,
    applied: Vec<(u16, u16)>,
    committed: bool,
}

impl PathTransaction {
    pub(crate) fn new(blocker: Arc<dyn PathBlocker>, change: PathChange) -> Self {
        Self {
            blocker,
            change,
            applied: Vec::new(),
            committed: false,
        }
    }

    pub(crate) fn apply(&mut self, from_port: u16, to_port: u16) -> Result<()> {
        self.change.send(self.blocker.as_ref(), from_port, to_port)?;
        self.applied.push((from_port, to_port));
        Ok(())
    }

    /// Keeps the applied changes.
    pub(crate) fn commit(mut self) {
        debug!(change = ?self.change, paths = self.applied.len(), "path transaction committed");
        self.committed = true;
    }
}

impl Drop for PathTransaction {
    fn drop(&mut self) {
        if self.committed || self.applied.is_empty() {
            return;
        }
        let undo = self.change.inverse();
        debug!(change = ?self.change, paths = self.applied.len(), "rolling back path transaction");
        for (from_port, to_port) in self.applied.drain(..).rev() {
            if let Err(err) = undo.send(self.blocker.as_ref(), from_port, to_port) {
                warn!(from_port, to_port, error = %err, "failed to roll back path change");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records path calls and fails once `budget` calls went through.
    #[derive(Default)]
    struct RecordingBlocker {
        calls: Mutex<Vec<(PathChange, u16, u16)>>,
        budget: Option<usize>,
    }

    impl RecordingBlocker {
        fn failing_after(budget: usize) -> Self {
            Self {
                budget: Some(budget),
                ..Self::default()
            }
        }

        fn record(&self, change: PathChange, from_port: u16, to_port: u16) -> std::result::Result<(), BlockError> {
            let mut calls = self.calls.lock().unwrap();
            if self.budget.is_some_and(|budget| calls.len() >= budget) && change == PathChange::Block {
                return Err(BlockError::Daemon {
                    addr: "test".to_string(),
                    reason: "refused".to_string(),
                });
            }
            calls.push((change, from_port, to_port));
            Ok(())
        }

        fn calls(&self) -> Vec<(PathChange, u16, u16)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl PathBlocker for RecordingBlocker {
        fn block(&self, from_port: u16, to_port: u16) -> std::result::Result<(), BlockError> {
            self.record(PathChange::Block, from_port, to_port)
        }

        fn unblock(&self, from_port: u16, to_port: u16) -> std::result::Result<(), BlockError> {
            self.record(PathChange::Unblock, from_port, to_port)
        }
    }

    #[test]
    fn test_commit_keeps_changes() {
        let blocker = Arc::new(RecordingBlocker::default());
        let mut transaction = PathTransaction::new(blocker.clone(), PathChange::Block);
        transaction.apply(1, 2).unwrap();
        transaction.apply(3, 4).unwrap();
        transaction.commit();

        assert_eq!(
            blocker.calls(),
            vec![(PathChange::Block, 1, 2), (PathChange::Block, 3, 4)]
        );
    }

    #[test]
    fn test_drop_rolls_back_in_reverse() {
        let blocker = Arc::new(RecordingBlocker::default());
        {
            let mut transaction = PathTransaction::new(blocker.clone(), PathChange::Unblock);
            transaction.apply(1, 2).unwrap();
            transaction.apply(3, 4).unwrap();
        }

        assert_eq!(
            blocker.calls(),
            vec![
                (PathChange::Unblock, 1, 2),
                (PathChange::Unblock, 3, 4),
                (PathChange::Block, 3, 4),
                (PathChange::Block, 1, 2),
            ]
        );
    }

    #[test]
    fn test_failed_apply_rolls_back_earlier_changes() {
        let blocker = Arc::new(RecordingBlocker::failing_after(2));
        let result = (|| -> Result<()> {
            let mut transaction = PathTransaction::new(blocker.clone(), PathChange::Block);
            transaction.apply(1, 2)?;
            transaction.apply(3, 4)?;
            transaction.apply(5, 6)?;
            transaction.commit();
            Ok(())
        })();

        assert!(matches!(result, Err(crate::Error::Block(_))));
        assert_eq!(
            blocker.calls(),
            vec![
                (PathChange::Block, 1, 2),
                (PathChange::Block, 3, 4),
                (PathChange::Unblock, 3, 4),
                (PathChange::Unblock, 1, 2),
            ]
        );
    }
}
