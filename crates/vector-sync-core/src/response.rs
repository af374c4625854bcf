//! Discriminated result type for the presentation boundary.
//!
//! Every facade call exposed to the admin layer is converted into an
//! [`ActionResult`] so that errors travel as data instead of panics or
//! transport failures:
//!
//! ```json
//! { "success": true, "data": { "started": true } }
//! { "success": false, "error": "at least one embedding profile must be selected", "code": "no_profile_selected" }
//! ```

use serde::Serialize;

use crate::error::SyncError;

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ActionResult<T> {
    Ok {
        success: Success,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<T>,
    },
    Err {
        success: Failure,
        error: String,
        code: &'static str,
    },
}

/// Serializes as `true`.
#[derive(Debug, Clone, Copy)]
pub struct Success;

/// Serializes as `false`.
#[derive(Debug, Clone, Copy)]
pub struct Failure;

impl Serialize for Success {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bool(true)
    }
}

impl Serialize for Failure {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bool(false)
    }
}

impl<T> ActionResult<T> {
    pub fn ok(data: T) -> Self {
        ActionResult::Ok {
            success: Success,
            data: Some(data),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ActionResult::Ok { .. })
    }

    /// The error code, for failed results.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            ActionResult::Ok { .. } => None,
            ActionResult::Err { code, .. } => Some(*code),
        }
    }
}

impl ActionResult<()> {
    /// Success with no payload: `{"success": true}`.
    pub fn done() -> Self {
        ActionResult::Ok {
            success: Success,
            data: None,
        }
    }
}

impl<T> From<SyncError> for ActionResult<T> {
    fn from(e: SyncError) -> Self {
        ActionResult::Err {
            success: Failure,
            error: e.to_string(),
            code: e.code(),
        }
    }
}

impl<T> From<Result<T, SyncError>> for ActionResult<T> {
    fn from(r: Result<T, SyncError>) -> Self {
        match r {
            Ok(data) => ActionResult::ok(data),
            Err(e) => e.into(),
        }
    }
}
