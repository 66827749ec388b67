//! The one-shot "save the next completed track" flag.

use crate::notify::Notifier;

/// Holds the save-next flag.  Every `set` is reported to listeners, even
/// when the value does not change, so a display can never drift from it.
pub struct SaveIntent {
    save_next: bool,
    notifier: Notifier,
}

impl SaveIntent {
    pub fn new(initial: bool, notifier: Notifier) -> Self {
        Self {
            save_next: initial,
            notifier,
        }
    }

    pub fn get(&self) -> bool {
        self.save_next
    }

    pub fn set(&mut self, value: bool) {
        self.save_next = value;
        self.notifier.on_save_intent_changed(value);
    }
}
