//! Tool-call bridge.
//!
//! The interpreter thread and the async host side meet here. A sandbox
//! `callTool(name, args)` validates the payload, records the pending call,
//! and blocks on a per-request oneshot while the bridge task invokes the
//! host handler. At most one request is ever in flight per execution, and
//! completions are strictly FIFO with respect to the calling flow.
//!
//! The host never sees inner-realm values (arguments cross as validated
//! JSON) and the inner realm never sees host objects (responses re-enter
//! through the membrane, or as a deep clone in acknowledged-direct mode).

use crate::realm::interpreter::Interp;
use crate::realm::intrinsics::{native, type_error};
use crate::realm::value::{new_error_value, Control, ErrorTag, Value};
use crate::sanitize::Sanitizer;
use enclave_core::config::{BridgeMode, ToolBridgeConfig};
use enclave_core::error::{EnclaveError, FailureKind};
use enclave_core::observability;
use serde_json::Value as Json;
use std::rc::Rc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Host-side tool handler. Errors are strings; the sanitizer strips
/// anything host-shaped before the message reaches the sandbox.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, name: &str, args: Json) -> Result<Json, String>;
}

/// Synchronous closures are handlers too (handy for tests and simple
/// embedders).
#[async_trait::async_trait]
impl<F> ToolHandler for F
where
    F: Fn(&str, Json) -> Result<Json, String> + Send + Sync,
{
    async fn handle(&self, name: &str, args: Json) -> Result<Json, String> {
        self(name, args)
    }
}

/// What the bridge task reports back for one call.
#[derive(Debug)]
pub enum ToolResponse {
    Ok(Json),
    HandlerError(String),
    PayloadTooLarge { actual: usize, limit: usize },
}

/// One pending tool call: created at `callTool`, destroyed when the
/// response lands.
pub struct ToolRequest {
    pub id: String,
    pub name: String,
    pub args: Json,
    pub respond_to: oneshot::Sender<ToolResponse>,
}

/// Interpreter-side endpoint. Owned by the executing task; the queue on
/// the other side is owned by the bridge.
pub struct ToolPort {
    tx: mpsc::Sender<ToolRequest>,
    pub config: ToolBridgeConfig,
    pub double_vm: bool,
    pub session_id: String,
}

impl ToolPort {
    pub fn new(
        tx: mpsc::Sender<ToolRequest>,
        config: ToolBridgeConfig,
        double_vm: bool,
        session_id: String,
    ) -> Self {
        Self {
            tx,
            config,
            double_vm,
            session_id,
        }
    }

    /// Dispatch one call and block until the host responds. Called from
    /// the interpreter thread only.
    pub fn dispatch(&self, name: &str, args: Json) -> Result<ToolResponse, EnclaveError> {
        let (respond_to, response) = oneshot::channel();
        let id = uuid::Uuid::new_v4().to_string();
        let payload_bytes = args.to_string().len();
        observability::audit_tool_call(&self.session_id, &id, name, payload_bytes);
        self.tx
            .blocking_send(ToolRequest {
                id: id.clone(),
                name: name.to_string(),
                args,
                respond_to,
            })
            .map_err(|_| EnclaveError::internal("tool bridge closed"))?;
        let outcome = response
            .blocking_recv()
            .map_err(|_| EnclaveError::internal("tool bridge dropped a pending call"))?;
        observability::audit_tool_result(
            &self.session_id,
            &id,
            matches!(outcome, ToolResponse::Ok(_)),
            match &outcome {
                ToolResponse::Ok(json) => json.to_string().len(),
                _ => 0,
            },
        );
        Ok(outcome)
    }
}

/// The async bridge task: consumes requests, invokes the host handler,
/// validates response size, posts the response. Ends when the port drops.
pub async fn serve_bridge(
    mut rx: mpsc::Receiver<ToolRequest>,
    handler: Arc<dyn ToolHandler>,
    max_payload_bytes: usize,
) {
    while let Some(request) = rx.recv().await {
        let result = handler.handle(&request.name, request.args).await;
        let response = match result {
            Ok(json) => {
                let actual = json.to_string().len();
                if actual > max_payload_bytes {
                    ToolResponse::PayloadTooLarge {
                        actual,
                        limit: max_payload_bytes,
                    }
                } else {
                    ToolResponse::Ok(json)
                }
            }
            Err(message) => ToolResponse::HandlerError(message),
        };
        // A dropped receiver means the run already terminated; nothing to do.
        let _ = request.respond_to.send(response);
    }
}

/// Build the in-sandbox `callTool` global. The bridge capability lives in
/// the interpreter, not the global scope — this native is the only way in.
pub fn call_tool_native(sanitizer: Rc<Sanitizer>) -> Value {
    native("callTool", move |interp: &mut Interp<'_>, args| {
        let name = match args.first() {
            Some(Value::Str(s)) => s.to_string(),
            _ => return Err(type_error("callTool: tool name must be a string")),
        };
        let payload = args.get(1).cloned().unwrap_or(Value::Undefined);

        // Arguments must be structurally clonable: no functions, bounded
        // depth, no dangerous keys.
        let max_depth = interp
            .tool_port
            .as_ref()
            .map(|p| p.config.max_value_depth)
            .unwrap_or(enclave_core::limits::DEFAULT_MAX_VALUE_DEPTH);
        let json = crate::membrane::value_to_json(&payload, max_depth, false)
            .map_err(|e| type_error(format!("callTool: invalid arguments: {}", e)))?;

        // Budget first, then size: a flood of oversized calls still burns
        // the call budget.
        interp.governor.tick_tool_call()?;

        let Some(port) = interp.tool_port.as_ref() else {
            return Err(Control::Throw(new_error_value(
                "Error",
                "callTool: no tool handler configured",
                ErrorTag::ToolError,
            )));
        };
        let max_payload = port.config.max_payload_bytes;
        let double_vm = port.double_vm;
        let mode = port.config.mode;
        let request_bytes = json.to_string().len();
        if request_bytes > max_payload {
            return Err(Control::Throw(new_error_value(
                "Error",
                &format!(
                    "callTool: request payload of {} bytes exceeds limit of {} bytes",
                    request_bytes, max_payload
                ),
                ErrorTag::PayloadTooLarge,
            )));
        }

        let outcome = port.dispatch(&name, json)?;

        // Suspension pauses neither the clock nor the counters: a long
        // external call can legitimately time the run out right here.
        interp.governor.check_clock()?;

        match outcome {
            ToolResponse::Ok(json) => {
                let staged = if double_vm {
                    // Outer-realm staging pass: the response is re-parsed
                    // into a fresh tree before the inner realm sees it, so
                    // no host-held reference survives into the wrap.
                    serde_json::from_str(&json.to_string()).unwrap_or(Json::Null)
                } else {
                    json
                };
                match mode {
                    BridgeMode::Isolated => Ok(interp.membrane.wrap_json(Rc::new(staged), 0)),
                    BridgeMode::Direct => Ok(crate::membrane::json_to_value(&staged)),
                }
            }
            ToolResponse::HandlerError(message) => {
                Err(Control::Throw(sanitizer.tool_error_value(&message)))
            }
            ToolResponse::PayloadTooLarge { actual, limit } => {
                Err(Control::Throw(new_error_value(
                    "Error",
                    &format!(
                        "callTool: response payload of {} bytes exceeds limit of {} bytes",
                        actual, limit
                    ),
                    ErrorTag::PayloadTooLarge,
                )))
            }
        }
    })
}

/// Map an uncaught sandbox throw to its failure kind.
pub fn failure_kind_of_throw(value: &Value) -> FailureKind {
    match value {
        Value::Object(obj) => match obj.borrow().error_tag {
            ErrorTag::Security => FailureKind::SecurityViolation,
            ErrorTag::ToolError => FailureKind::ToolError,
            ErrorTag::PayloadTooLarge => FailureKind::ToolPayloadTooLarge,
            ErrorTag::None => FailureKind::RuntimeError,
        },
        _ => FailureKind::RuntimeError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_closure_is_a_handler() {
        let handler = |name: &str, _args: Json| -> Result<Json, String> {
            Ok(serde_json::json!({ "tool": name }))
        };
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let out = rt.block_on(handler.handle("echo", serde_json::json!({})));
        assert_eq!(out.unwrap()["tool"], "echo");
    }

    #[tokio::test]
    async fn test_bridge_validates_response_size() {
        let (tx, rx) = mpsc::channel::<ToolRequest>(1);
        let handler: Arc<dyn ToolHandler> = Arc::new(|_: &str, _: Json| {
            Ok(serde_json::json!({ "blob": "x".repeat(64) }))
        });
        let bridge = tokio::spawn(serve_bridge(rx, handler, 16));

        let (respond_to, response) = oneshot::channel();
        tx.send(ToolRequest {
            id: "1".to_string(),
            name: "big".to_string(),
            args: Json::Null,
            respond_to,
        })
        .await
        .unwrap();
        match response.await.unwrap() {
            ToolResponse::PayloadTooLarge { actual, limit } => {
                assert!(actual > limit);
                assert_eq!(limit, 16);
            }
            other => panic!("expected size failure, got {:?}", other),
        }
        drop(tx);
        bridge.await.unwrap();
    }

    #[tokio::test]
    async fn test_bridge_fifo_order() {
        let (tx, rx) = mpsc::channel::<ToolRequest>(1);
        let handler: Arc<dyn ToolHandler> = Arc::new(|name: &str, _: Json| {
            Ok(serde_json::json!(name.to_string()))
        });
        let bridge = tokio::spawn(serve_bridge(rx, handler, 1024));

        for name in ["first", "second", "third"] {
            let (respond_to, response) = oneshot::channel();
            tx.send(ToolRequest {
                id: name.to_string(),
                name: name.to_string(),
                args: Json::Null,
                respond_to,
            })
            .await
            .unwrap();
            match response.await.unwrap() {
                ToolResponse::Ok(json) => assert_eq!(json, serde_json::json!(name)),
                other => panic!("expected ok, got {:?}", other),
            }
        }
        drop(tx);
        bridge.await.unwrap();
    }

    #[test]
    fn test_throw_kind_mapping() {
        let security = new_error_value("SecurityViolation", "x", ErrorTag::Security);
        assert_eq!(
            failure_kind_of_throw(&security),
            FailureKind::SecurityViolation
        );
        let plain = new_error_value("TypeError", "x", ErrorTag::None);
        assert_eq!(failure_kind_of_throw(&plain), FailureKind::RuntimeError);
        assert_eq!(
            failure_kind_of_throw(&Value::str("thrown string")),
            FailureKind::RuntimeError
        );
    }
}
