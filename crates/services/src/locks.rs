use std::collections::HashMap;
use std::sync::Arc;

use course_core::model::UserId;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Idle entries are swept once the table grows past this.
const SWEEP_THRESHOLD: usize = 256;

/// One async mutex per user so read-modify-write cycles on a progress record
/// never interleave. Different users never contend.
#[derive(Clone, Default)]
pub struct UserLocks {
    table: Arc<Mutex<HashMap<UserId, Arc<Mutex<()>>>>>,
}

impl UserLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `user_id`'s record. Released on drop.
    pub async fn lock(&self, user_id: UserId) -> OwnedMutexGuard<()> {
        let slot = {
            let mut table = self.table.lock().await;
            if table.len() >= SWEEP_THRESHOLD {
                // only the table holds an idle slot
                table.retain(|_, slot| Arc::strong_count(slot) > 1);
            }
            Arc::clone(table.entry(user_id).or_default())
        };
        slot.lock_owned().await
    }

    /// Number of users with a slot, held or idle.
    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.table.lock().await.len()
    }
}
