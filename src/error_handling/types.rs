use std::fmt;

use serde::Serialize;
use uuid::Uuid;

/// Coarse classification shared by every error surfaced to a caller.
///
/// The web layer maps each variant to a response status; streams use it for their terminal
/// event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorStatus {
    NotFound,
    InvalidState,
    InvalidArgument,
    ResourceExhausted,
    PermissionDenied,
    Cancelled,
    Internal,
}

impl fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorStatus::NotFound => "NOT_FOUND",
            ErrorStatus::InvalidState => "INVALID_STATE",
            ErrorStatus::InvalidArgument => "INVALID_ARGUMENT",
            ErrorStatus::ResourceExhausted => "RESOURCE_EXHAUSTED",
            ErrorStatus::PermissionDenied => "PERMISSION_DENIED",
            ErrorStatus::Cancelled => "CANCELLED",
            ErrorStatus::Internal => "INTERNAL",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    BadIPFormatting(String),
    DirectoryDoesNotExist(String),
    NotInRange(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::BadIPFormatting(e) => write!(f, "IP formatting error: {}", e),
            ConfigError::DirectoryDoesNotExist(e) => write!(f, "Directory error: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    CatalogNotFound(String),
    CatalogNotAlive(String),
    CatalogAlreadyAlive(String),
    CatalogAlreadyExists(String),
    InvalidCatalogName(String),
    ReservedKeyword(String),
}

impl CatalogError {
    pub fn status(&self) -> ErrorStatus {
        match self {
            CatalogError::CatalogNotFound(_) => ErrorStatus::NotFound,
            CatalogError::CatalogNotAlive(_)
            | CatalogError::CatalogAlreadyAlive(_)
            | CatalogError::CatalogAlreadyExists(_) => ErrorStatus::InvalidState,
            CatalogError::InvalidCatalogName(_) | CatalogError::ReservedKeyword(_) => {
                ErrorStatus::InvalidArgument
            }
        }
    }
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogError::CatalogNotFound(n) => write!(f, "Catalog `{}` not found", n),
            CatalogError::CatalogNotAlive(n) => {
                write!(f, "Catalog `{}` is still warming up and accepts no writes", n)
            }
            CatalogError::CatalogAlreadyAlive(n) => write!(f, "Catalog `{}` is already alive", n),
            CatalogError::CatalogAlreadyExists(n) => write!(f, "Catalog `{}` already exists", n),
            CatalogError::InvalidCatalogName(n) => write!(f, "Invalid catalog name `{}`", n),
            CatalogError::ReservedKeyword(n) => {
                write!(f, "Catalog name `{}` is a reserved keyword", n)
            }
        }
    }
}

impl std::error::Error for CatalogError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    Catalog(CatalogError),
    NotFound(Uuid),
    SessionLimitReached,
    InvalidSessionId(String),
}

impl SessionError {
    pub fn status(&self) -> ErrorStatus {
        match self {
            SessionError::Catalog(e) => e.status(),
            SessionError::NotFound(_) => ErrorStatus::NotFound,
            SessionError::SessionLimitReached => ErrorStatus::ResourceExhausted,
            SessionError::InvalidSessionId(_) => ErrorStatus::InvalidArgument,
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Catalog(e) => write!(f, "Catalog error: {}", e),
            SessionError::NotFound(id) => write!(f, "Session {} not found", id),
            SessionError::SessionLimitReached => write!(f, "Session limit reached"),
            SessionError::InvalidSessionId(s) => write!(f, "Invalid session id `{}`", s),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<CatalogError> for SessionError {
    fn from(err: CatalogError) -> Self {
        SessionError::Catalog(err)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    Catalog(CatalogError),
    SessionNotWritable(Uuid),
    SessionClosed(Uuid),
    TransactionAlreadyOpen { session_id: Uuid, transaction_id: Uuid },
    TransactionNotFound(Uuid),
    NotOwner { transaction_id: Uuid, session_id: Uuid },
}

impl TransactionError {
    pub fn status(&self) -> ErrorStatus {
        match self {
            TransactionError::Catalog(e) => e.status(),
            TransactionError::SessionNotWritable(_) => ErrorStatus::PermissionDenied,
            TransactionError::SessionClosed(_) => ErrorStatus::NotFound,
            TransactionError::TransactionAlreadyOpen { .. } => ErrorStatus::InvalidState,
            TransactionError::TransactionNotFound(_) => ErrorStatus::NotFound,
            TransactionError::NotOwner { .. } => ErrorStatus::PermissionDenied,
        }
    }
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionError::Catalog(e) => write!(f, "Catalog error: {}", e),
            TransactionError::SessionNotWritable(id) => {
                write!(f, "Session {} is read-only and cannot hold a transaction", id)
            }
            TransactionError::SessionClosed(id) => write!(f, "Session {} is already closed", id),
            TransactionError::TransactionAlreadyOpen {
                session_id,
                transaction_id,
            } => write!(
                f,
                "Session {} already holds open transaction {}",
                session_id, transaction_id
            ),
            TransactionError::TransactionNotFound(id) => {
                write!(f, "Transaction {} not found or already closed", id)
            }
            TransactionError::NotOwner {
                transaction_id,
                session_id,
            } => write!(
                f,
                "Transaction {} is not owned by session {}",
                transaction_id, session_id
            ),
        }
    }
}

impl std::error::Error for TransactionError {}

impl From<CatalogError> for TransactionError {
    fn from(err: CatalogError) -> Self {
        TransactionError::Catalog(err)
    }
}

/// Errors raised by the change-data-capture broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    SubscriptionNotFound(Uuid),
    SessionClosed(Uuid),
    InvalidFilter(String),
    /// The subscriber did not drain its queue in time and was dropped.
    Evicted(Uuid),
    Cancelled(Uuid),
}

impl CaptureError {
    pub fn status(&self) -> ErrorStatus {
        match self {
            CaptureError::SubscriptionNotFound(_) | CaptureError::SessionClosed(_) => {
                ErrorStatus::NotFound
            }
            CaptureError::InvalidFilter(_) => ErrorStatus::InvalidArgument,
            CaptureError::Evicted(_) => ErrorStatus::ResourceExhausted,
            CaptureError::Cancelled(_) => ErrorStatus::Cancelled,
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::SubscriptionNotFound(id) => write!(f, "Subscription {} not found", id),
            CaptureError::SessionClosed(id) => write!(f, "Session {} is already closed", id),
            CaptureError::InvalidFilter(e) => write!(f, "Invalid change capture filter: {}", e),
            CaptureError::Evicted(id) => write!(
                f,
                "Subscription {} evicted: consumer did not keep up with the change stream",
                id
            ),
            CaptureError::Cancelled(id) => write!(f, "Subscription {} cancelled", id),
        }
    }
}

impl std::error::Error for CaptureError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    WriteFailed(String),
    ReadFailed(String),
}

impl StorageError {
    pub fn status(&self) -> ErrorStatus {
        ErrorStatus::Internal
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::WriteFailed(e) => write!(f, "Storage write failed: {}", e),
            StorageError::ReadFailed(e) => write!(f, "Storage read failed: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingError {
    RecordingAlreadyActive(Uuid),
    RecordingNotActive,
    InvalidSamplingRate(u8),
    TaskMismatch { expected: Uuid, given: Uuid },
    StorageError(StorageError),
}

impl RecordingError {
    pub fn status(&self) -> ErrorStatus {
        match self {
            RecordingError::RecordingAlreadyActive(_) => ErrorStatus::InvalidState,
            RecordingError::RecordingNotActive => ErrorStatus::InvalidState,
            RecordingError::InvalidSamplingRate(_) => ErrorStatus::InvalidArgument,
            RecordingError::TaskMismatch { .. } => ErrorStatus::NotFound,
            RecordingError::StorageError(e) => e.status(),
        }
    }
}

impl fmt::Display for RecordingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingError::RecordingAlreadyActive(task) => {
                write!(f, "Traffic recording already active (task {})", task)
            }
            RecordingError::RecordingNotActive => write!(f, "Traffic recording is not active"),
            RecordingError::InvalidSamplingRate(r) => {
                write!(f, "Sampling rate {} is outside of 1..=100", r)
            }
            RecordingError::TaskMismatch { expected, given } => write!(
                f,
                "Task {} is not the active recording (active task is {})",
                given, expected
            ),
            RecordingError::StorageError(e) => write!(f, "Recording storage error: {}", e),
        }
    }
}

impl std::error::Error for RecordingError {}

impl From<StorageError> for RecordingError {
    fn from(err: StorageError) -> Self {
        RecordingError::StorageError(err)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagementError {
    TaskNotFound(Uuid),
    TaskNotCancellable(Uuid),
    FileNotFound(Uuid),
    InvalidPage { page: usize, page_size: usize },
    StorageError(StorageError),
}

impl ManagementError {
    pub fn status(&self) -> ErrorStatus {
        match self {
            ManagementError::TaskNotFound(_) | ManagementError::FileNotFound(_) => {
                ErrorStatus::NotFound
            }
            ManagementError::TaskNotCancellable(_) => ErrorStatus::InvalidState,
            ManagementError::InvalidPage { .. } => ErrorStatus::InvalidArgument,
            ManagementError::StorageError(e) => e.status(),
        }
    }
}

impl fmt::Display for ManagementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagementError::TaskNotFound(id) => write!(f, "Task {} not found", id),
            ManagementError::TaskNotCancellable(id) => {
                write!(f, "Task {} has already finished", id)
            }
            ManagementError::FileNotFound(id) => write!(f, "File {} not found", id),
            ManagementError::InvalidPage { page, page_size } => write!(
                f,
                "Invalid page request: page={} page_size={} (both must be > 0)",
                page, page_size
            ),
            ManagementError::StorageError(e) => write!(f, "Management storage error: {}", e),
        }
    }
}

impl std::error::Error for ManagementError {}

impl From<StorageError> for ManagementError {
    fn from(err: StorageError) -> Self {
        ManagementError::StorageError(err)
    }
}

/// Umbrella error returned by the controller to every entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    Catalog(CatalogError),
    Session(SessionError),
    Transaction(TransactionError),
    Capture(CaptureError),
    Recording(RecordingError),
    Management(ManagementError),
    InvalidArgument(String),
    Internal(String),
}

impl ServiceError {
    pub fn status(&self) -> ErrorStatus {
        match self {
            ServiceError::Catalog(e) => e.status(),
            ServiceError::Session(e) => e.status(),
            ServiceError::Transaction(e) => e.status(),
            ServiceError::Capture(e) => e.status(),
            ServiceError::Recording(e) => e.status(),
            ServiceError::Management(e) => e.status(),
            ServiceError::InvalidArgument(_) => ErrorStatus::InvalidArgument,
            ServiceError::Internal(_) => ErrorStatus::Internal,
        }
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::Catalog(e) => write!(f, "{}", e),
            ServiceError::Session(e) => write!(f, "{}", e),
            ServiceError::Transaction(e) => write!(f, "{}", e),
            ServiceError::Capture(e) => write!(f, "{}", e),
            ServiceError::Recording(e) => write!(f, "{}", e),
            ServiceError::Management(e) => write!(f, "{}", e),
            ServiceError::InvalidArgument(e) => write!(f, "Invalid argument: {}", e),
            ServiceError::Internal(e) => write!(f, "Internal error: {}", e),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<CatalogError> for ServiceError {
    fn from(err: CatalogError) -> Self {
        ServiceError::Catalog(err)
    }
}

impl From<SessionError> for ServiceError {
    fn from(err: SessionError) -> Self {
        ServiceError::Session(err)
    }
}

impl From<TransactionError> for ServiceError {
    fn from(err: TransactionError) -> Self {
        ServiceError::Transaction(err)
    }
}

impl From<CaptureError> for ServiceError {
    fn from(err: CaptureError) -> Self {
        ServiceError::Capture(err)
    }
}

impl From<RecordingError> for ServiceError {
    fn from(err: RecordingError) -> Self {
        ServiceError::Recording(err)
    }
}

impl From<ManagementError> for ServiceError {
    fn from(err: ManagementError) -> Self {
        ServiceError::Management(err)
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Internal(err.to_string())
    }
}
