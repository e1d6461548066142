//! Change notification from repositories to the live query layer.

use liveq_protocol::ChangeRecord;
use parking_lot::RwLock;
use std::sync::Arc;

/// A sink for repository mutation outcomes.
///
/// The live query publisher implements this to turn committed changes
/// into per-query deltas.
pub trait ChangesListener: Send + Sync {
    /// Called once per repository operation with every row it mutated.
    fn item_changed(&self, entity_key: &str, changes: &[ChangeRecord]);
}

/// Routes mutation outcomes to a single pluggable listener.
///
/// The notifier is an explicit object handed to repository
/// construction; there is no process-wide default. The listener is
/// absent by default, so builds without live queries pay nothing for
/// the seam. Repositories notify only after the underlying write has
/// committed; a failed write produces no records.
#[derive(Default)]
pub struct ChangeNotifier {
    listener: RwLock<Option<Arc<dyn ChangesListener>>>,
}

impl ChangeNotifier {
    /// Creates a notifier with no listener attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the listener, replacing any previous one.
    pub fn set_listener(&self, listener: Arc<dyn ChangesListener>) {
        *self.listener.write() = Some(listener);
    }

    /// Removes the listener.
    pub fn clear_listener(&self) {
        *self.listener.write() = None;
    }

    /// Returns true if a listener is attached.
    pub fn has_listener(&self) -> bool {
        self.listener.read().is_some()
    }

    /// Forwards committed changes to the listener, if any.
    pub fn notify(&self, entity_key: &str, changes: &[ChangeRecord]) {
        if changes.is_empty() {
            return;
        }
        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            listener.item_changed(entity_key, changes);
        }
    }
}
