//! Wire types for the host bridge.
//!
//! Every call crosses the boundary as a small JSON envelope:
//!
//! ```json
//! { "method": "resolveCustomPath", "argument": "AT0f...==" }
//! ```
//!
//! and is answered with
//!
//! ```json
//! { "result": "/Documents/WisparDB" }
//! ```
//!
//! or, for failures in tagged mode (and always for unknown methods),
//!
//! ```json
//! { "result": null, "error": { "kind": "stale_bookmark", "message": "..." } }
//! ```

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AccessError, ErrorKind};
use crate::types::PickPurpose;

/// A host request as received from the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodCall {
    pub method: String,
    #[serde(default)]
    pub argument: Option<String>,
}

impl MethodCall {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            argument: None,
        }
    }

    pub fn with_argument(method: impl Into<String>, argument: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            argument: Some(argument.into()),
        }
    }
}

/// Operations the broker answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BridgeMethod {
    GetExportDirectory,
    SelectCustomDatabasePath,
    StartSecurityScopedAccess,
    StopSecurityScopedAccess,
    ResolveCustomPath,
}

impl BridgeMethod {
    pub const ALL: [BridgeMethod; 5] = [
        BridgeMethod::GetExportDirectory,
        BridgeMethod::SelectCustomDatabasePath,
        BridgeMethod::StartSecurityScopedAccess,
        BridgeMethod::StopSecurityScopedAccess,
        BridgeMethod::ResolveCustomPath,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeMethod::GetExportDirectory => "getExportDirectory",
            BridgeMethod::SelectCustomDatabasePath => "selectCustomDatabasePath",
            BridgeMethod::StartSecurityScopedAccess => "startSecurityScopedAccess",
            BridgeMethod::StopSecurityScopedAccess => "stopSecurityScopedAccess",
            BridgeMethod::ResolveCustomPath => "resolveCustomPath",
        }
    }

    /// Picker purpose for methods that present a chooser.
    pub fn pick_purpose(&self) -> Option<PickPurpose> {
        match self {
            BridgeMethod::GetExportDirectory => Some(PickPurpose::Export),
            BridgeMethod::SelectCustomDatabasePath => Some(PickPurpose::PersistentConfigure),
            _ => None,
        }
    }

    /// What the host sees when this method does not succeed.
    pub fn failure_value(&self) -> BridgeValue {
        match self {
            BridgeMethod::StartSecurityScopedAccess | BridgeMethod::StopSecurityScopedAccess => {
                BridgeValue::Bool(false)
            }
            _ => BridgeValue::Null,
        }
    }
}

impl FromStr for BridgeMethod {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BridgeMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| AccessError::NotImplemented(s.to_string()))
    }
}

impl std::fmt::Display for BridgeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Primitive payload crossing the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BridgeValue {
    Bool(bool),
    String(String),
    Null,
}

impl BridgeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            BridgeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            BridgeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, BridgeValue::Null)
    }
}

impl From<Option<String>> for BridgeValue {
    fn from(value: Option<String>) -> Self {
        value.map(BridgeValue::String).unwrap_or(BridgeValue::Null)
    }
}

/// Error details attached to a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
}

/// How much failure detail crosses the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryMode {
    /// Failures become null/false; only "not implemented" is reported explicitly.
    #[default]
    Collapsed,
    /// Failures carry `{kind, message}` next to the null/false result.
    Tagged,
}

/// Reply envelope for one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeReply {
    pub result: BridgeValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl BridgeReply {
    pub fn ok(result: BridgeValue) -> Self {
        Self {
            result,
            error: None,
        }
    }

    /// Collapse a failure of `method` according to `mode`.
    ///
    /// Cancelled picks are not errors: they yield a plain null in every mode.
    pub fn failure(method: BridgeMethod, error: &AccessError, mode: BoundaryMode) -> Self {
        let error = match (mode, error.kind()) {
            (_, ErrorKind::PickCancelled) => None,
            (BoundaryMode::Tagged, kind) => Some(ErrorPayload {
                kind,
                message: error.to_string(),
            }),
            (BoundaryMode::Collapsed, _) => None,
        };
        Self {
            result: method.failure_value(),
            error,
        }
    }

    /// Explicit signal for a method name the broker does not know.
    pub fn not_implemented(method: &str) -> Self {
        Self {
            result: BridgeValue::Null,
            error: Some(ErrorPayload {
                kind: ErrorKind::NotImplemented,
                message: AccessError::NotImplemented(method.to_string()).to_string(),
            }),
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}
