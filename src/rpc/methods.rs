//! RPC Method Implementations
//!
//! Each method corresponds to a JSON-RPC call that operators can make.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::checkpoint::{CheckpointError, CheckpointManager};
use crate::crypto::Hash;
use crate::p2p::PeerManager;
use crate::storage::{BlockIndex, CheckpointDb};

/// JSON-RPC 2.0 Request
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Option<serde_json::Value>,
    pub id: serde_json::Value,
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub result: Option<serde_json::Value>,
    pub error: Option<JsonRpcError>,
    pub id: serde_json::Value,
}

/// JSON-RPC Error
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

const METHOD_NOT_FOUND: i32 = -32601;
const INVALID_PARAMS: i32 = -32602;
const MISC_ERROR: i32 = -1;
const NOT_MASTER: i32 = -4;

impl JsonRpcResponse {
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: serde_json::Value, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError { code, message }),
            id,
        }
    }
}

/// RPC Handler State
pub struct RpcState {
    pub checkpoints: Arc<CheckpointManager<CheckpointDb>>,
    pub chain: Arc<Mutex<BlockIndex>>,
    pub peer_manager: Arc<Mutex<PeerManager>>,
}

/// Process a JSON-RPC request and return a response
pub fn handle_request(state: &RpcState, request: JsonRpcRequest) -> JsonRpcResponse {
    match request.method.as_str() {
        "getcheckpoint" => get_checkpoint(state, request.id),
        "sendcheckpoint" => send_checkpoint(state, request.id, request.params),
        "getcheckpointmode" => get_checkpoint_mode(state, request.id),
        _ => JsonRpcResponse::error(
            request.id,
            METHOD_NOT_FOUND,
            format!("Method not found: {}", request.method),
        ),
    }
}

/// Returns the active sync-checkpoint and protocol state
fn get_checkpoint(state: &RpcState, id: serde_json::Value) -> JsonRpcResponse {
    let status = {
        let chain = state.chain.lock();
        state.checkpoints.status(&*chain)
    };

    match serde_json::to_value(status) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::error(id, MISC_ERROR, e.to_string()),
    }
}

/// Signs and broadcasts a checkpoint for the given block (master node only)
fn send_checkpoint(
    state: &RpcState,
    id: serde_json::Value,
    params: Option<serde_json::Value>,
) -> JsonRpcResponse {
    let hash_str = match params {
        Some(serde_json::Value::Array(arr)) if !arr.is_empty() => {
            arr[0].as_str().unwrap_or("").to_string()
        }
        Some(serde_json::Value::String(s)) => s,
        _ => {
            return JsonRpcResponse::error(
                id,
                INVALID_PARAMS,
                "Invalid params: expected block hash".into(),
            )
        }
    };

    let hash = match Hash::from_hex(&hash_str) {
        Ok(h) => h,
        Err(_) => return JsonRpcResponse::error(id, INVALID_PARAMS, "Invalid block hash".into()),
    };

    let result = {
        let mut chain = state.chain.lock();
        let mut peers = state.peer_manager.lock();
        state
            .checkpoints
            .send_sync_checkpoint(&mut *chain, &hash, peers.connected_peers_mut())
    };

    match result {
        Ok(_) => get_checkpoint(state, id),
        Err(CheckpointError::MissingPrivateKey) => {
            JsonRpcResponse::error(id, NOT_MASTER, "Not a checkpoint master node".into())
        }
        Err(e) => JsonRpcResponse::error(id, MISC_ERROR, format!("Failed to send checkpoint: {}", e)),
    }
}

/// Returns the checkpoint enforcement mode
fn get_checkpoint_mode(state: &RpcState, id: serde_json::Value) -> JsonRpcResponse {
    JsonRpcResponse::success(id, serde_json::json!(state.checkpoints.mode().to_string()))
}
