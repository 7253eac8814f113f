#![allow(dead_code)]

pub mod harness;
pub mod http_client;

use std::time::Duration;

use tmsync::{EntryStore, TmId, TmStatus};
use tokio::time::Instant;

/// Polls `condition` every 10ms for up to 5s.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// `ready` with every committed change covered by the installed index.
pub fn is_synced(store: &EntryStore, tm_id: TmId) -> bool {
    store
        .get_tm(tm_id)
        .is_ok_and(|tm| tm.status == TmStatus::Ready && !tm.is_dirty())
}
