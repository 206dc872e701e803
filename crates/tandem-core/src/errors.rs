/// Coarse error classes. Callers use these to pick a status code or decide
/// whether a retry makes sense.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    Authorization,
    Conflict,
    NotFound,
    Transport,
}

/// Every way a lifecycle, relay, directory or router operation can fail.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    // Validation
    #[error("message content cannot be empty")]
    EmptyContent,
    #[error("message too long ({len} > {max} characters)")]
    ContentTooLong { len: usize, max: usize },
    #[error("invalid username: {0}")]
    InvalidUsername(String),
    #[error("invalid event: {0}")]
    InvalidEvent(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // Authorization
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("claimed identity does not match this session")]
    IdentityMismatch,
    #[error("session has not joined")]
    NotJoined,

    // State conflict
    #[error("cannot send a connection request to yourself")]
    SelfTarget,
    #[error("{0} already has an active connection")]
    AlreadyConnected(String),
    #[error("a connection request to {0} is already pending")]
    DuplicateRequest(String),
    #[error("connection request is not pending")]
    RequestNotPending,
    #[error("one or both users already have an active connection")]
    ConflictAlreadyConnected,
    #[error("connection is not active")]
    ConnectionNotActive,
    #[error("username already exists: {0}")]
    UsernameTaken(String),
    #[error("session already joined")]
    AlreadyJoined,

    // Not found
    #[error("invalid target: {0}")]
    InvalidTarget(String),
    #[error("{0} not found")]
    NotFound(String),

    // Transport
    #[error("store unavailable: {0}")]
    Store(String),
}

impl ChatError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::EmptyContent
            | Self::ContentTooLong { .. }
            | Self::InvalidUsername(_)
            | Self::InvalidEvent(_)
            | Self::InvalidRequest(_) => ErrorClass::Validation,
            Self::Unauthorized(_) | Self::IdentityMismatch | Self::NotJoined => {
                ErrorClass::Authorization
            }
            Self::SelfTarget
            | Self::AlreadyConnected(_)
            | Self::DuplicateRequest(_)
            | Self::RequestNotPending
            | Self::ConflictAlreadyConnected
            | Self::ConnectionNotActive
            | Self::UsernameTaken(_)
            | Self::AlreadyJoined => ErrorClass::Conflict,
            Self::InvalidTarget(_) | Self::NotFound(_) => ErrorClass::NotFound,
            Self::Store(_) => ErrorClass::Transport,
        }
    }

    /// Stable machine-readable code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyContent => "EMPTY_CONTENT",
            Self::ContentTooLong { .. } => "CONTENT_TOO_LONG",
            Self::InvalidUsername(_) => "INVALID_USERNAME",
            Self::InvalidEvent(_) => "INVALID_EVENT",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::IdentityMismatch => "IDENTITY_MISMATCH",
            Self::NotJoined => "NOT_JOINED",
            Self::SelfTarget => "SELF_TARGET",
            Self::AlreadyConnected(_) => "ALREADY_CONNECTED",
            Self::DuplicateRequest(_) => "DUPLICATE_REQUEST",
            Self::RequestNotPending => "REQUEST_NOT_PENDING",
            Self::ConflictAlreadyConnected => "CONFLICT_ALREADY_CONNECTED",
            Self::ConnectionNotActive => "CONNECTION_NOT_ACTIVE",
            Self::UsernameTaken(_) => "USERNAME_TAKEN",
            Self::AlreadyJoined => "ALREADY_JOINED",
            Self::InvalidTarget(_) => "INVALID_TARGET",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Store(_) => "STORE_UNAVAILABLE",
        }
    }

    /// Only store outages are worth retrying; everything else is deterministic.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transport
    }

    /// Message safe to show a client. Store details stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            Self::Store(_) => "Storage temporarily unavailable, please retry".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_store_errors_are_retryable() {
        assert!(ChatError::Store("locked".into()).is_retryable());
        assert!(!ChatError::ConflictAlreadyConnected.is_retryable());
        assert!(!ChatError::EmptyContent.is_retryable());
    }

    #[test]
    fn classes() {
        assert_eq!(ChatError::EmptyContent.class(), ErrorClass::Validation);
        assert_eq!(ChatError::NotJoined.class(), ErrorClass::Authorization);
        assert_eq!(ChatError::RequestNotPending.class(), ErrorClass::Conflict);
        assert_eq!(ChatError::InvalidTarget("x".into()).class(), ErrorClass::NotFound);
        assert_eq!(ChatError::Store("x".into()).class(), ErrorClass::Transport);
    }

    #[test]
    fn codes_are_screaming_snake() {
        assert_eq!(ChatError::ContentTooLong { len: 1001, max: 1000 }.code(), "CONTENT_TOO_LONG");
        assert_eq!(ChatError::ConflictAlreadyConnected.code(), "CONFLICT_ALREADY_CONNECTED");
        assert_eq!(ChatError::Store(String::new()).code(), "STORE_UNAVAILABLE");
    }

    #[test]
    fn content_too_long_display() {
        let err = ChatError::ContentTooLong { len: 1001, max: 1000 };
        assert_eq!(err.to_string(), "message too long (1001 > 1000 characters)");
    }

    #[test]
    fn client_message_hides_store_details() {
        let err = ChatError::Store("disk I/O error at /var/lib/tandem.db".into());
        assert!(!err.client_message().contains("/var/lib"));
        assert_eq!(
            ChatError::SelfTarget.client_message(),
            "cannot send a connection request to yourself"
        );
    }
}
