//! Per-item results for batch stages.
//!
//! Batch stages never let one item's failure escape; each item's outcome is
//! kept so callers can see which items failed and why. Configuration errors,
//! storage errors and cancellation still abort the batch.

use contentforge_shared::{ContentForgeError, ErrorKind, FeedId, ItemId, Result, Stage};
use tokio_util::sync::CancellationToken;

/// Outcome for one unit of a batch.
#[derive(Debug)]
pub struct Outcome<K, T> {
    pub id: K,
    pub result: Result<T>,
}

/// All outcomes of one batch, in processing order.
#[derive(Debug)]
pub struct BatchReport<K, T> {
    pub outcomes: Vec<Outcome<K, T>>,
}

pub type ItemBatch<T> = BatchReport<ItemId, T>;
pub type FeedBatch<T> = BatchReport<FeedId, T>;

impl<K, T> Default for BatchReport<K, T> {
    fn default() -> Self {
        Self {
            outcomes: Vec::new(),
        }
    }
}

impl<K, T> BatchReport<K, T> {
    pub fn push(&mut self, id: K, result: Result<T>) {
        self.outcomes.push(Outcome { id, result });
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.succeeded()
    }

    pub fn successes(&self) -> impl Iterator<Item = (&K, &T)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().map(|v| (&o.id, v)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&K, &ContentForgeError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (&o.id, e)))
    }
}

/// Errors that abort a whole batch instead of skipping one item.
pub(crate) fn is_fatal(err: &ContentForgeError) -> bool {
    matches!(
        err.kind(),
        ErrorKind::Config | ErrorKind::Storage | ErrorKind::Cancelled
    )
}

/// Fail with `Cancelled` if the token has fired.
pub(crate) fn ensure_active(cancel: &CancellationToken, stage: Stage) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(ContentForgeError::Cancelled(stage));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_and_partitions() {
        let mut report: ItemBatch<u8> = BatchReport::default();
        let ok = ItemId::new();
        let bad = ItemId::new();
        report.push(ok, Ok(7));
        report.push(bad, Err(ContentForgeError::parse("bad json")));

        assert_eq!(report.total(), 2);
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.successes().next(), Some((&ok, &7)));
        let (id, err) = report.failures().next().unwrap();
        assert_eq!(*id, bad);
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn fatal_kinds() {
        assert!(is_fatal(&ContentForgeError::config("no key")));
        assert!(is_fatal(&ContentForgeError::Cancelled(Stage::Score)));
        assert!(!is_fatal(&ContentForgeError::parse("x")));
        assert!(!is_fatal(&ContentForgeError::external("ai", "503")));
    }

    #[test]
    fn cancelled_token_stops() {
        let token = CancellationToken::new();
        assert!(ensure_active(&token, Stage::Score).is_ok());
        token.cancel();
        let err = ensure_active(&token, Stage::Score).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
