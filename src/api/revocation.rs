use serde::{Deserialize, Serialize};

use crate::api::ErrorObject;

/// Form body for the revoke endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Revocation<'a> {
    pub reason: &'a str,
}

/// ZeroSSL reports `success` as `1`/`0` on these endpoints but as `false` next to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SuccessFlag {
    Bool(bool),
    Int(i64),
}

impl SuccessFlag {
    pub fn is_success(self) -> bool {
        match self {
            SuccessFlag::Bool(flag) => flag,
            SuccessFlag::Int(flag) => flag == 1,
        }
    }
}

/// Response of the cancel and revoke endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: Option<SuccessFlag>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_flag_forms() {
        let ok: SuccessResponse = serde_json::from_str(r#"{"success": 1}"#).unwrap();
        assert!(ok.success.unwrap().is_success());

        let refused: SuccessResponse = serde_json::from_str(r#"{"success": 0}"#).unwrap();
        assert!(!refused.success.unwrap().is_success());

        let failed: SuccessResponse = serde_json::from_str(
            r#"{"success": false, "error": {"code": 2833, "type": "certificate_not_cancelled"}}"#,
        )
        .unwrap();
        assert!(!failed.success.unwrap().is_success());
        assert!(failed.error.is_some());
    }
}
