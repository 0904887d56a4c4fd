use core::fmt;
use std::{collections::HashMap, sync::Arc};

/// An index type used to retrieve the result of a deferred read.
///
/// This type can detect if the result of a read is not used anymore.
#[derive(Eq)]
pub struct DeferredResultIndex(Arc<()>);

impl PartialEq for DeferredResultIndex {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for DeferredResultIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DeferredResultIndex")
            .field(&self.id())
            .finish()
    }
}

impl DeferredResultIndex {
    // Only the queue creates these.
    pub(crate) fn new() -> Self {
        Self(Arc::new(()))
    }

    fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    pub(crate) fn should_capture(&self) -> bool {
        // The queue and the caller each hold one reference. If the caller
        // dropped theirs, nobody can take the result anymore.
        Arc::strong_count(&self.0) > 1
    }

    // Only the queue keeps a second reference.
    pub(crate) fn share(&self) -> Self {
        Self(self.0.clone())
    }
}

impl std::hash::Hash for DeferredResultIndex {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id().hash(state)
    }
}

/// The results of deferred reads, keyed by their index.
pub(crate) struct DeferredResultSet<T>(HashMap<DeferredResultIndex, T>);

impl<T: fmt::Debug> fmt::Debug for DeferredResultSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DeferredResultSet").field(&self.0).finish()
    }
}

impl<T> Default for DeferredResultSet<T> {
    fn default() -> Self {
        Self(HashMap::default())
    }
}

impl<T> DeferredResultSet<T> {
    pub(crate) fn push(&mut self, idx: &DeferredResultIndex, result: T) {
        if idx.should_capture() {
            self.0.insert(idx.share(), result);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    /// Drops results whose readers are gone.
    pub(crate) fn prune(&mut self) {
        self.0.retain(|k, _| k.should_capture());
    }

    /// Takes a result from the set.
    pub(crate) fn take(&mut self, index: DeferredResultIndex) -> Result<T, DeferredResultIndex> {
        self.0.remove(&index).ok_or(index)
    }
}

#[cfg(test)]
mod test {
    use super::{DeferredResultIndex, DeferredResultSet};

    #[test]
    fn results_of_dropped_handles_are_not_kept() {
        let mut set = DeferredResultSet::default();

        let kept = DeferredResultIndex::new();
        let kept_in_queue = kept.share();
        let dropped = DeferredResultIndex::new();
        let dropped_in_queue = dropped.share();
        drop(dropped);

        set.push(&kept_in_queue, 1u32);
        set.push(&dropped_in_queue, 2u32);

        assert_eq!(set.len(), 1);
        assert_eq!(set.take(kept).ok(), Some(1));
    }

    #[test]
    fn prune_forgets_abandoned_results() {
        let mut set = DeferredResultSet::default();
        let handle = DeferredResultIndex::new();
        let handle_in_queue = handle.share();
        set.push(&handle_in_queue, 7u32);
        drop(handle_in_queue);
        assert_eq!(set.len(), 1);

        drop(handle);
        set.prune();
        assert_eq!(set.len(), 0);
    }
}
