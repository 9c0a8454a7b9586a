use std::collections::HashMap;

use tracing::warn;

use crate::features::trade::history::HistoryApi;
use crate::features::trade::message::{ChatMessage, sort_timeline};
use crate::features::trade::store::MessageStore;

/// Result of one reconciliation pass.
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub timeline: Vec<ChatMessage>,
    /// True when the remote fetch failed and the timeline is the local-only
    /// cached view.
    pub degraded: bool,
}

/// Merges a local and a remote history by message id. The remote copy wins
/// on content for a shared id; local-only messages (sent but not yet
/// confirmed by the server) are kept. Output is `(timestamp, id)` ordered.
pub fn merge_histories(local: Vec<ChatMessage>, remote: Vec<ChatMessage>) -> Vec<ChatMessage> {
    let mut by_id: HashMap<String, ChatMessage> = HashMap::with_capacity(local.len());
    for msg in local {
        by_id.insert(msg.id.clone(), msg);
    }
    for msg in remote {
        by_id.insert(msg.id.clone(), msg);
    }
    let mut merged: Vec<ChatMessage> = by_id.into_values().collect();
    sort_timeline(&mut merged);
    merged
}

/// Fetches the authoritative remote history for a room, merges it with the
/// locally cached history, writes the result back into the store, and
/// returns the merged timeline. A failed fetch degrades to the local view.
pub async fn reconcile(
    store: &MessageStore,
    api: &dyn HistoryApi,
    room_id: &str,
) -> ReconcileOutcome {
    let local = store.history(room_id);

    match api.fetch_history(room_id).await {
        Ok(remote) => {
            let timeline = merge_histories(local, remote);
            store.replace_history(room_id, timeline.clone());
            ReconcileOutcome {
                timeline,
                degraded: false,
            }
        }
        Err(err) => {
            warn!("history fetch for room {room_id} failed, serving cached view: {err}");
            ReconcileOutcome {
                timeline: local,
                degraded: true,
            }
        }
    }
}
