use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use retrieval_pipeline::{SearchFilters, SearchRequest, SnippetResult};

use crate::api_state::ApiState;

pub const SESSION_HEADER: &str = "Mcp-Session-Id";

const TOOL_RESULT_LIMIT: usize = 10;
const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[allow(dead_code)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

fn rpc_result(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn rpc_error(id: Value, code: i64, message: &str) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
}

fn tool_descriptors() -> Value {
    json!([
        {
            "name": "semantic_search",
            "description": "Search indexed repositories for code matching a natural-language or code query.",
            "inputSchema": {
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"]
            }
        },
        {
            "name": "keyword_search",
            "description": "Search indexed repositories for code matching the given keywords.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "keywords": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["keywords"]
            }
        }
    ])
}

fn tool_hits(results: &[SnippetResult]) -> Value {
    let hits: Vec<Value> = results
        .iter()
        .map(|result| {
            let path = result
                .snippet
                .derives_from
                .first()
                .map(|source| source.path.clone())
                .unwrap_or_default();
            let preview: String = result.snippet.content.chars().take(PREVIEW_CHARS).collect();
            json!({
                "uri": format!("file://{path}"),
                "path": path,
                "language": result.snippet.extension,
                "lines": result.snippet.content.lines().count(),
                "score": result.score,
                "preview": preview,
            })
        })
        .collect();
    Value::Array(hits)
}

async fn call_tool(state: &ApiState, name: &str, arguments: &Value) -> Result<Value, String> {
    let request = match name {
        "semantic_search" => {
            let query = arguments
                .get("query")
                .and_then(Value::as_str)
                .ok_or_else(|| "semantic_search requires a string 'query'".to_string())?;
            SearchRequest {
                keywords: None,
                code: Some(query.to_string()),
                text: Some(query.to_string()),
                limit: TOOL_RESULT_LIMIT,
                filters: SearchFilters::default(),
            }
        }
        "keyword_search" => {
            let keywords: Vec<String> = arguments
                .get("keywords")
                .and_then(Value::as_array)
                .map(|values| {
                    values
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .ok_or_else(|| "keyword_search requires a 'keywords' array".to_string())?;
            SearchRequest {
                keywords: Some(keywords),
                code: None,
                text: None,
                limit: TOOL_RESULT_LIMIT,
                filters: SearchFilters::default(),
            }
        }
        other => return Err(format!("unknown tool {other}")),
    };

    let results = state
        .search
        .find(request)
        .await
        .map_err(|err| err.to_string())?;
    let payload = tool_hits(&results);
    let encoded = serde_json::to_string(&payload).map_err(|err| err.to_string())?;

    Ok(json!({
        "content": [{ "type": "text", "text": encoded }],
        "isError": false
    }))
}

/// The MCP JSON-RPC endpoint. `initialize` mints a session id; every response
/// carries the session header back.
pub async fn mcp_endpoint(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    debug!(method = %request.method, "mcp request");

    let session_id = headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let body = match request.method.as_str() {
        "initialize" => rpc_result(
            request.id,
            json!({
                "protocolVersion": "2024-11-05",
                "serverInfo": { "name": "kodit", "version": env!("CARGO_PKG_VERSION") },
                "capabilities": { "tools": {} }
            }),
        ),
        "notifications/initialized" => rpc_result(request.id, json!({})),
        "tools/list" => rpc_result(request.id, json!({ "tools": tool_descriptors() })),
        "tools/call" => {
            let name = request
                .params
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let arguments = request
                .params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| json!({}));
            match call_tool(&state, &name, &arguments).await {
                Ok(result) => rpc_result(request.id, result),
                Err(message) => rpc_error(request.id, -32602, &message),
            }
        }
        _ => rpc_error(request.id, -32601, "method not found"),
    };

    let mut response_headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&session_id) {
        response_headers.insert(SESSION_HEADER, value);
    }

    (response_headers, Json(body))
}
