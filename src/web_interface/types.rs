use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use warp::http::StatusCode;

use crate::change_capture::ClassifierType;
use crate::error_handling::types::{ErrorStatus, ServiceError, SessionError};
use crate::management::TaskState;
use crate::session_management::SessionMode;
use crate::traffic_recording::{HistoryFilter, Label, RecordingCriteria, RecordingSettings};

/// Header carrying the caller's session id on session-scoped routes.
pub const SESSION_HEADER: &str = "x-session-id";

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const DEFAULT_TOP_N: usize = 10;
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// API error payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiError {
    pub status: ErrorStatus,
    pub message: String,
}

impl From<&ServiceError> for ApiError {
    fn from(err: &ServiceError) -> Self {
        Self {
            status: err.status(),
            message: err.to_string(),
        }
    }
}

pub fn status_code(status: ErrorStatus) -> StatusCode {
    match status {
        ErrorStatus::NotFound => StatusCode::NOT_FOUND,
        ErrorStatus::InvalidState => StatusCode::CONFLICT,
        ErrorStatus::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorStatus::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        ErrorStatus::PermissionDenied => StatusCode::FORBIDDEN,
        // client closed request
        ErrorStatus::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
        ErrorStatus::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Reads the session id out of the `x-session-id` header value.
pub fn parse_session_id(raw: Option<String>) -> Result<Uuid, ServiceError> {
    let raw = raw.ok_or_else(|| {
        ServiceError::InvalidArgument(format!("missing `{}` header", SESSION_HEADER))
    })?;
    Uuid::parse_str(raw.trim()).map_err(|_| SessionError::InvalidSessionId(raw).into())
}

/// Maps the path segment of the create routes to a session mode.
pub fn session_mode(slug: &str) -> Result<SessionMode, ServiceError> {
    match slug {
        "read-only" => Ok(SessionMode::READ_ONLY),
        "read-write" => Ok(SessionMode::READ_WRITE),
        "binary-read-only" => Ok(SessionMode::BINARY_READ_ONLY),
        "binary-read-write" => Ok(SessionMode::BINARY_READ_WRITE),
        other => Err(ServiceError::InvalidArgument(format!(
            "unknown session mode `{}`",
            other
        ))),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionRequest {
    pub catalog: String,
    #[serde(default)]
    pub labels: Vec<Label>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DefineCatalogRequest {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenameCatalogRequest {
    pub new_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplaceCatalogRequest {
    pub to_be_replaced: String,
    pub replaced_by: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloseTransactionRequest {
    pub commit: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpsertEntityRequest {
    pub primary_key: Option<i64>,
    pub classifier: Option<ClassifierType>,
    #[serde(default)]
    pub body: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StartRecordingRequest {
    pub criteria: RecordingCriteria,
    pub settings: RecordingSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StopRecordingRequest {
    pub task_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HistoryRequest {
    pub filter: HistoryFilter,
    pub limit: Option<usize>,
    pub reversed: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LabelQuery {
    pub prefix: Option<String>,
    pub top_n: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskQuery {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
    /// Comma separated task states, e.g. `RUNNING,FAILED`.
    pub states: Option<String>,
}

impl TaskQuery {
    pub fn parse_states(&self) -> Result<Vec<TaskState>, ServiceError> {
        let Some(ref states) = self.states else {
            return Ok(Vec::new());
        };
        states
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                serde_json::from_value(Value::String(s.to_ascii_uppercase()))
                    .map_err(|_| ServiceError::InvalidArgument(format!("unknown task state `{}`", s)))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileQuery {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
    pub origin: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeletedResponse {
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnregisteredResponse {
    pub unregistered: bool,
}

/// First event of a change capture stream.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionAnnouncement {
    pub subscription_id: Uuid,
    pub session_id: Uuid,
    pub since_sequence: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(status_code(ErrorStatus::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_code(ErrorStatus::InvalidState), StatusCode::CONFLICT);
        assert_eq!(status_code(ErrorStatus::Cancelled).as_u16(), 499);
        assert_eq!(
            status_code(ErrorStatus::ResourceExhausted),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_session_header_parsing() {
        let id = Uuid::new_v4();
        assert_eq!(parse_session_id(Some(format!(" {} ", id))).unwrap(), id);
        assert_eq!(
            parse_session_id(None).unwrap_err().status(),
            ErrorStatus::InvalidArgument
        );
        assert_eq!(
            parse_session_id(Some("nope".into())).unwrap_err(),
            ServiceError::Session(SessionError::InvalidSessionId("nope".into()))
        );
    }

    #[test]
    fn test_task_states_query() {
        let query = TaskQuery {
            states: Some("running, finished".into()),
            ..Default::default()
        };
        assert_eq!(
            query.parse_states().unwrap(),
            vec![TaskState::Running, TaskState::Finished]
        );
        let bad = TaskQuery {
            states: Some("sleeping".into()),
            ..Default::default()
        };
        assert!(bad.parse_states().is_err());
    }

    #[test]
    fn test_session_modes() {
        assert_eq!(
            session_mode("binary-read-write").unwrap(),
            SessionMode::BINARY_READ_WRITE
        );
        assert!(session_mode("write-only").is_err());
    }

    #[test]
    fn test_api_error_payload() {
        let err = ServiceError::InvalidArgument("bad".into());
        let json = serde_json::to_value(ApiError::from(&err)).unwrap();
        assert_eq!(json["status"], "INVALID_ARGUMENT");
        assert_eq!(json["message"], "Invalid argument: bad");
    }
}
