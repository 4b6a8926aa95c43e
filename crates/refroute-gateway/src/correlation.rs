use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::GatewayError;

type PendingSender = oneshot::Sender<Result<Value, GatewayError>>;

/// Matches asynchronous responses to their originating caller by request id.
///
/// Entries are created before the request frame is written and removed by the
/// first of: matching response, caller deadline, process exit. A response for
/// an id that is no longer present is dropped without effect.
#[derive(Default)]
pub struct CorrelationTable {
    pending: Mutex<HashMap<u64, PendingSender>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: u64) -> oneshot::Receiver<Result<Value, GatewayError>> {
        let (sender, receiver) = oneshot::channel();
        self.pending.lock().insert(id, sender);
        receiver
    }

    /// Drops the entry for an expired deadline so a late response is ignored.
    pub fn remove(&self, id: u64) -> bool {
        self.pending.lock().remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Routes one incoming message. Messages without a numeric id, and
    /// messages whose id is unknown, are dropped.
    pub fn dispatch(&self, message: &Value) {
        let Some(id) = message.get("id").and_then(Value::as_u64) else {
            return;
        };
        let Some(sender) = self.pending.lock().remove(&id) else {
            return;
        };

        if let Some(error) = message.get("error") {
            let text = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("tool server error");
            let _ = sender.send(Err(GatewayError::Tool(text.to_string())));
            return;
        }

        let result = message.get("result").cloned().unwrap_or(Value::Null);
        let _ = sender.send(Ok(unwrap_content(result)));
    }

    /// Drains every pending entry; used when the child process exits.
    pub fn reject_all(&self, error: &GatewayError) {
        let drained: Vec<PendingSender> = {
            let mut pending = self.pending.lock();
            pending.drain().map(|(_, sender)| sender).collect()
        };
        for sender in drained {
            let _ = sender.send(Err(error.clone()));
        }
    }
}

/// The tool protocol nests structured results inside `content[0].text` as a
/// JSON-encoded string; parse one level deeper when that shape is present.
/// If the inner parse fails the raw payload passes through unchanged.
fn unwrap_content(result: Value) -> Value {
    let inner = result
        .get("content")
        .and_then(|content| content.get(0))
        .and_then(|entry| entry.get("text"))
        .and_then(Value::as_str)
        .and_then(|text| serde_json::from_str::<Value>(text).ok());
    inner.unwrap_or(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn success_response_unwraps_nested_payload() {
        let table = CorrelationTable::new();
        let receiver = table.register(1);
        table.dispatch(&json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {"content": [{"type": "text", "text": "{\"zip_code\":\"90210\"}"}]}
        }));
        let value = receiver.await.expect("resolved").expect("success");
        assert_eq!(value, json!({"zip_code": "90210"}));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn non_json_text_payload_passes_through_unchanged() {
        let table = CorrelationTable::new();
        let receiver = table.register(2);
        let raw = json!({"content": [{"type": "text", "text": "plain words"}]});
        table.dispatch(&json!({"jsonrpc": "2.0", "id": 2, "result": raw}));
        let value = receiver.await.expect("resolved").expect("success");
        assert_eq!(value, raw);
    }

    #[tokio::test]
    async fn error_response_carries_the_server_message() {
        let table = CorrelationTable::new();
        let receiver = table.register(3);
        table.dispatch(&json!({
            "jsonrpc": "2.0",
            "id": 3,
            "error": {"code": -32000, "message": "query failed"}
        }));
        match receiver.await.expect("resolved") {
            Err(GatewayError::Tool(message)) => assert_eq!(message, "query failed"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_id_is_dropped_and_pending_entries_survive() {
        let table = CorrelationTable::new();
        let receiver = table.register(4);
        table.dispatch(&json!({"jsonrpc": "2.0", "id": 99, "result": {}}));
        assert_eq!(table.len(), 1);
        drop(receiver);
    }

    #[tokio::test]
    async fn late_response_after_removal_has_no_effect() {
        let table = CorrelationTable::new();
        let receiver = table.register(5);
        assert!(table.remove(5));
        table.dispatch(&json!({"jsonrpc": "2.0", "id": 5, "result": {}}));
        assert!(table.is_empty());
        assert!(receiver.await.is_err());
    }

    #[tokio::test]
    async fn reject_all_drains_every_entry_with_the_same_error() {
        let table = CorrelationTable::new();
        let receivers = (1..=3).map(|id| table.register(id)).collect::<Vec<_>>();
        table.reject_all(&GatewayError::ProcessExited);
        assert!(table.is_empty());
        for receiver in receivers {
            match receiver.await.expect("resolved") {
                Err(GatewayError::ProcessExited) => {}
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
    }
}
