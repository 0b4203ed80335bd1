use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Fault code reserved by the agent for "payment required". Mirrors the HTTP
/// status so both transports route into the same interrupt.
pub const ERROR_CODE_PAYMENT_REQUIRED: i64 = 402;

/// Request envelope for the single-POST JSON-RPC endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// Protocol-level fault object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcFault {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcFault {
    #[must_use]
    pub fn is_payment_required(&self) -> bool {
        self.code == ERROR_CODE_PAYMENT_REQUIRED
    }
}

/// Response envelope: exactly one of `result` / `error` is present.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcFault>,
}

#[cfg(test)]
mod tests {
    use super::{RpcFault, RpcRequest, RpcResponse, ERROR_CODE_PAYMENT_REQUIRED};

    #[test]
    fn request_envelope_carries_version_and_method() {
        let request = RpcRequest::new(7, "tasks/get", serde_json::json!({ "id": "t-1" }));
        let json = serde_json::to_value(&request).expect("request serializes");

        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 7);
        assert_eq!(json["method"], "tasks/get");
        assert_eq!(json["params"]["id"], "t-1");
    }

    #[test]
    fn response_envelope_splits_result_and_error() {
        let ok: RpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":{"id":"t-1"}}"#)
                .expect("result envelope parses");
        assert!(ok.result.is_some());
        assert!(ok.error.is_none());

        let fault: RpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32600,"message":"invalid request"}}"#,
        )
        .expect("error envelope parses");
        assert!(fault.result.is_none());
        assert_eq!(fault.error.expect("fault present").code, -32600);
    }

    #[test]
    fn payment_required_fault_is_distinguished() {
        let fault = RpcFault {
            code: ERROR_CODE_PAYMENT_REQUIRED,
            message: "payment required".to_owned(),
            data: None,
        };
        assert!(fault.is_payment_required());

        let generic = RpcFault {
            code: -32000,
            message: "server error".to_owned(),
            data: None,
        };
        assert!(!generic.is_payment_required());
    }
}
