use std::time::Duration;

use crate::mirror::{Mirror, SharedMirror};

/// Let spawned feed loops drain whatever is queued.
pub(crate) async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

/// Wait until `pred` holds for the mirror, failing the test after a second.
pub(crate) async fn wait_until(mirror: &SharedMirror, pred: impl Fn(&Mirror) -> bool) {
    let mut revisions = mirror.subscribe();
    let waited = tokio::time::timeout(Duration::from_secs(1), async {
        while !mirror.read(&pred) {
            if revisions.changed().await.is_err() {
                break;
            }
        }
    })
    .await;
    assert!(waited.is_ok(), "mirror never reached the expected state");
}
