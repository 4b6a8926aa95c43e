use serde_json::{json, Value};
use tokio::time::timeout;

use crate::error::GatewayError;
use crate::supervisor::{ProcessState, ProcessSupervisor, ToolServerConfig};

/// Tool exposed by the referral tool server.
pub const SUGGEST_TOOL_NAME: &str = "suggest_referral_organization";

/// Caller-facing facade over the supervised tool server process.
///
/// Every call lazily ensures a live child, registers a correlation entry,
/// writes one `tools/call` frame, and waits on the entry under the configured
/// deadline. The gateway is cheap to share behind an `Arc`.
pub struct RpcGateway {
    supervisor: ProcessSupervisor,
}

impl RpcGateway {
    pub fn new(config: ToolServerConfig) -> Self {
        Self {
            supervisor: ProcessSupervisor::new(config),
        }
    }

    pub async fn state(&self) -> ProcessState {
        self.supervisor.state().await
    }

    /// Number of calls currently awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.supervisor.pending().len()
    }

    /// Invokes a named tool and returns its decoded result payload.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, GatewayError> {
        let mut handle = self.supervisor.ensure_ready().await?;
        if !handle.is_alive() {
            // The child died between handshake and this call; one respawn
            // attempt, then the error stands.
            handle = self.supervisor.ensure_ready().await?;
        }

        let id = self.supervisor.next_request_id();
        let receiver = self.supervisor.pending().register(id);
        let frame = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": {"name": name, "arguments": arguments}
        });
        if let Err(err) = self.supervisor.write_frame(&handle, &frame).await {
            self.supervisor.pending().remove(id);
            return Err(err);
        }

        match timeout(self.supervisor.config().call_timeout, receiver).await {
            Err(_) => {
                self.supervisor.pending().remove(id);
                Err(GatewayError::RequestTimeout)
            }
            Ok(Err(_)) => Err(GatewayError::ProcessExited),
            Ok(Ok(result)) => result,
        }
    }

    /// Asks the tool server for ranked referral candidates around a ZIP code.
    pub async fn suggest(
        &self,
        patient_zip_code: &str,
        organization_type: Option<&str>,
        sender_org_id: Option<&str>,
    ) -> Result<Value, GatewayError> {
        let mut arguments = json!({"patient_zip_code": patient_zip_code});
        if let Some(org_type) = organization_type {
            arguments["organization_type"] = Value::String(org_type.to_string());
        }
        if let Some(sender) = sender_org_id {
            arguments["sender_org_id"] = Value::String(sender.to_string());
        }
        self.call_tool(SUGGEST_TOOL_NAME, arguments).await
    }

    /// Kills the child and fails any in-flight calls with `ProcessExited`.
    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }
}
