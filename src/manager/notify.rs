//! Scoped suppression of context notifications.

use super::ObjectManager;
use crate::observer::ObserverEvent;
use crate::types::SessionId;
use std::ops::{Deref, DerefMut};

/// Guard returned by [`ObjectManager::suppress_notifications`].
///
/// While alive, the listed contexts neither filter property changes nor queue
/// events. Dropping the guard restores them and queues one `Refreshed` event
/// per context whose suppression ended. Guards nest.
pub struct NotificationSuppression<'a> {
    manager: &'a mut ObjectManager,
    contexts: Vec<SessionId>,
}

impl ObjectManager {
    pub fn suppress_notifications(&mut self, contexts: &[SessionId]) -> NotificationSuppression<'_> {
        for session_id in contexts {
            if let Some(context) = self.contexts.get_mut(session_id) {
                context.suppression_depth += 1;
            }
        }
        NotificationSuppression {
            manager: self,
            contexts: contexts.to_vec(),
        }
    }
}

impl Deref for NotificationSuppression<'_> {
    type Target = ObjectManager;

    fn deref(&self) -> &ObjectManager {
        self.manager
    }
}

impl DerefMut for NotificationSuppression<'_> {
    fn deref_mut(&mut self) -> &mut ObjectManager {
        self.manager
    }
}

impl Drop for NotificationSuppression<'_> {
    fn drop(&mut self) {
        let mut refreshed = Vec::new();
        for session_id in &self.contexts {
            // contexts torn down while suppressed are skipped
            if let Some(context) = self.manager.contexts.get_mut(session_id) {
                context.suppression_depth = context.suppression_depth.saturating_sub(1);
                if context.suppression_depth == 0 {
                    refreshed.push(*session_id);
                }
            }
        }
        for context in refreshed {
            self.manager.emit(ObserverEvent::Refreshed { context });
        }
    }
}
