use std::collections::HashSet;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use refroute_directory::{CoverageQuery, JsonDirectory, ReferralDirectory};
use refroute_ranking::{rank_candidates, SuggestRequest, ZipArea};

use crate::protocol::{
    JsonRpcRequest, JsonRpcResponse, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST,
    METHOD_NOT_FOUND, PARSE_ERROR,
};

const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
const MIN_ZIP_LEN: usize = 3;

pub const SUGGEST_TOOL: &str = "suggest_referral_organization";

pub struct ToolServer {
    directory: Arc<dyn ReferralDirectory>,
}

#[derive(Debug, Deserialize)]
struct ToolsCallParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct SuggestInput {
    patient_zip_code: String,
    #[serde(default)]
    organization_type: Option<String>,
    #[serde(default)]
    sender_org_id: Option<String>,
}

impl ToolServer {
    /// Opens the directory named by `REFROUTE_DATA`.
    pub fn from_env() -> Result<Self, String> {
        let data_path = std::env::var("REFROUTE_DATA")
            .unwrap_or_else(|_| "./data/referral-directory.json".to_string());
        Self::with_data_path(data_path)
    }

    pub fn with_data_path(path: impl AsRef<std::path::Path>) -> Result<Self, String> {
        let directory = JsonDirectory::open(path).map_err(|e| e.to_string())?;
        Ok(Self::with_directory(Arc::new(directory)))
    }

    pub fn with_directory(directory: Arc<dyn ReferralDirectory>) -> Self {
        Self { directory }
    }

    /// Dispatches one JSON-RPC request. Notifications return `None`.
    pub fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::error(
                request.id.unwrap_or(Value::Null),
                INVALID_REQUEST,
                "invalid jsonrpc version",
            ));
        }

        if request.is_notification() {
            // notifications/initialized and any other notification are consumed.
            return None;
        }
        let id = request.id.clone().unwrap_or(Value::Null);

        let response = match request.method.as_str() {
            "initialize" => {
                let protocol_version = request
                    .params
                    .get("protocolVersion")
                    .and_then(Value::as_str)
                    .unwrap_or(MCP_PROTOCOL_VERSION);
                JsonRpcResponse::success(
                    id,
                    json!({
                        "protocolVersion": protocol_version,
                        "serverInfo": {"name": "refroute-mcp", "version": env!("CARGO_PKG_VERSION")},
                        "capabilities": {
                            "tools": {
                                "listChanged": false
                            }
                        }
                    }),
                )
            }
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => JsonRpcResponse::success(id, Self::tools_list_result()),
            "tools/call" => self.handle_tools_call(id, request.params),
            _ => JsonRpcResponse::error(id, METHOD_NOT_FOUND, "method not found"),
        };

        Some(response)
    }

    fn tools_list_result() -> Value {
        json!({
            "tools": [
                {
                    "name": SUGGEST_TOOL,
                    "description": "Suggest the best organization to send a referral to based on coverage area, historical acceptance rate, and specialty matching. Returns ranked suggestions with match scores.",
                    "inputSchema": {
                        "type": "object",
                        "required": ["patient_zip_code"],
                        "properties": {
                            "patient_zip_code": {"type": "string", "minLength": MIN_ZIP_LEN},
                            "organization_type": {"type": "string"},
                            "sender_org_id": {"type": "string"}
                        }
                    }
                }
            ]
        })
    }

    fn handle_tools_call(&self, id: Value, params: Value) -> JsonRpcResponse {
        let parsed: ToolsCallParams = match serde_json::from_value(params) {
            Ok(v) => v,
            Err(err) => {
                return JsonRpcResponse::error(id, INVALID_PARAMS, format!("invalid params: {err}"));
            }
        };

        match parsed.name.as_str() {
            SUGGEST_TOOL => self.exec_suggest(id, parsed.arguments),
            _ => JsonRpcResponse::error(id, METHOD_NOT_FOUND, "unknown tool"),
        }
    }

    fn exec_suggest(&self, id: Value, arguments: Option<Value>) -> JsonRpcResponse {
        let args: SuggestInput = match serde_json::from_value(arguments.unwrap_or(Value::Null)) {
            Ok(v) => v,
            Err(err) => {
                return JsonRpcResponse::error(id, INVALID_PARAMS, format!("invalid arguments: {err}"));
            }
        };
        if args.patient_zip_code.trim().len() < MIN_ZIP_LEN {
            return JsonRpcResponse::error(
                id,
                INVALID_PARAMS,
                format!("patient_zip_code must be at least {MIN_ZIP_LEN} characters"),
            );
        }

        let payload = match self.suggest(
            &args.patient_zip_code,
            args.organization_type.as_deref(),
            args.sender_org_id.as_deref(),
        ) {
            Ok(v) => v,
            Err(err) => {
                return JsonRpcResponse::error(
                    id,
                    INTERNAL_ERROR,
                    format!("Error suggesting organizations: {err}"),
                );
            }
        };
        let text = match serde_json::to_string(&payload) {
            Ok(v) => v,
            Err(err) => return JsonRpcResponse::error(id, INTERNAL_ERROR, err.to_string()),
        };

        JsonRpcResponse::success(
            id,
            json!({
                "content": [{"type": "text", "text": text}]
            }),
        )
    }

    fn suggest(
        &self,
        zip_code: &str,
        organization_type: Option<&str>,
        sender_org_id: Option<&str>,
    ) -> Result<refroute_ranking::SuggestionList, String> {
        let area = self
            .directory
            .resolve_zip(zip_code)
            .map_err(|e| e.to_string())?
            .unwrap_or_else(ZipArea::default);

        let rows = self
            .directory
            .coverage_lookup(&CoverageQuery {
                zip_code,
                area: &area,
                exclude_org_id: sender_org_id,
                organization_type,
            })
            .map_err(|e| e.to_string())?;

        let org_ids = rows
            .iter()
            .map(|row| row.organization_id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect::<Vec<_>>();
        let stats = self
            .directory
            .acceptance_lookup(&org_ids)
            .map_err(|e| e.to_string())?;

        Ok(rank_candidates(
            &rows,
            &stats,
            &SuggestRequest {
                zip_code,
                area: &area,
                organization_type,
                sender_org_id,
            },
        ))
    }

    /// Serves newline-delimited JSON-RPC over stdin/stdout until EOF. A line
    /// that fails to parse gets a `-32700` response; the loop keeps running.
    pub fn serve_stdio(&self) -> io::Result<()> {
        let stdin = io::stdin();
        let mut reader = io::BufReader::new(stdin.lock());
        let mut stdout = io::stdout();
        let mut line = String::new();

        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let request: JsonRpcRequest = match serde_json::from_str(trimmed) {
                Ok(v) => v,
                Err(err) => {
                    let response =
                        JsonRpcResponse::error(Value::Null, PARSE_ERROR, format!("parse error: {err}"));
                    write_line(&mut stdout, &response)?;
                    continue;
                }
            };

            if let Some(response) = self.handle_request(request) {
                write_line(&mut stdout, &response)?;
            }
        }

        Ok(())
    }
}

fn write_line(stdout: &mut io::Stdout, response: &JsonRpcResponse) -> io::Result<()> {
    let rendered = serde_json::to_string(response)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    stdout.write_all(rendered.as_bytes())?;
    stdout.write_all(b"\n")?;
    stdout.flush()
}
