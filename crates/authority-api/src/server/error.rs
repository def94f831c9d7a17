#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("failed to open store: {0}")]
    Persistence(#[from] PersistenceError),
}

#[derive(Debug)]
struct HttpApiError {
    status: StatusCode,
    error: ApiError,
}

impl HttpApiError {
    fn space_not_found(space_id: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            error: ApiError::new(
                ErrorCode::SpaceNotFound,
                "space is not active",
                Some(format!("space_id={space_id}")),
            ),
        }
    }

    fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            error: ApiError::new(ErrorCode::Unauthorized, message, None),
        }
    }

    fn invalid_command(message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: ApiError::new(ErrorCode::InvalidCommand, message, details),
        }
    }

    fn internal(message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: ApiError::new(ErrorCode::InternalError, message, details),
        }
    }

    fn from_rejection(rejection: CommandRejection) -> Self {
        match rejection {
            CommandRejection::SpaceNotActive(space_id) => Self::space_not_found(&space_id),
            CommandRejection::DuplicateEvent(event_id) => Self {
                status: StatusCode::CONFLICT,
                error: ApiError::new(
                    ErrorCode::Conflict,
                    "event id is already scheduled",
                    Some(format!("event_id={event_id}")),
                ),
            },
            other => Self::invalid_command(other.to_string(), None),
        }
    }

    fn from_collaborator(space_id: &str, err: CollaboratorError) -> Self {
        Self::internal(
            "space could not be loaded",
            Some(format!("space_id={space_id} error={err}")),
        )
    }
}

impl IntoResponse for HttpApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.error)).into_response()
    }
}
