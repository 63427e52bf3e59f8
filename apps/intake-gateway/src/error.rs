use axum::body::Body;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
	#[error("unsupported media type: {0}")]
	UnsupportedMimeType(String),

	#[error("no file was attached to the request")]
	MissingFile,

	#[error("uploaded file has no filename")]
	EmptyFilename,

	#[error("no job log found for job_id {0}")]
	JobNotFound(Uuid),

	#[error("remote source url is not a reachable http(s) url: {0}")]
	InvalidUrl(String),

	#[error("missing required field: {0}")]
	MissingField(&'static str),

	#[error("file_uid is not a valid uuid: {0}")]
	InvalidFileUid(String),

	#[error("api_keys field is not valid json")]
	InvalidApiKeys,

	#[error("request timeout")]
	RequestTimeout,

	#[error("service overloaded")]
	ServiceOverloaded,

	#[error("multipart error: {0}")]
	Multipart(#[from] axum::extract::multipart::MultipartError),

	#[error("queue error: {0}")]
	Queue(#[from] job_queue::JobQueueError),

	#[error("job store error: {0}")]
	Store(#[from] job_store::JobStoreError),

	#[error("i/o error: {0}")]
	Io(#[from] std::io::Error),

	#[error("unhandled tower error: {0}")]
	Tower(tower::BoxError),
}

impl IntakeError {
	const fn status_code(&self) -> StatusCode {
		match self {
			Self::UnsupportedMimeType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
			Self::MissingFile | Self::EmptyFilename | Self::InvalidUrl(_) | Self::Multipart(_) | Self::MissingField(_) | Self::InvalidFileUid(_) | Self::InvalidApiKeys => StatusCode::BAD_REQUEST,
			Self::JobNotFound(_) => StatusCode::NOT_FOUND,
			Self::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
			Self::ServiceOverloaded => StatusCode::SERVICE_UNAVAILABLE,
			Self::Queue(_) | Self::Store(_) | Self::Io(_) | Self::Tower(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}
}

#[derive(Serialize)]
struct ErrorBody {
	error: String,
}

impl IntoResponse for IntakeError {
	fn into_response(self) -> Response<Body> {
		if matches!(self, Self::Queue(_) | Self::Store(_) | Self::Io(_) | Self::Tower(_)) {
			tracing::error!(error = %self, "intake request failed");
		}

		(self.status_code(), Json(ErrorBody { error: self.to_string() })).into_response()
	}
}

/// Maps tower middleware failures (timeout, load shed) the way
/// `apps/servers/file_host`'s `handle_tower_error` does.
pub async fn handle_tower_error(error: tower::BoxError) -> IntakeError {
	if error.is::<tower::timeout::error::Elapsed>() {
		tracing::warn!(%error, "request timeout");
		IntakeError::RequestTimeout
	} else if error.is::<tower::load_shed::error::Overloaded>() {
		tracing::warn!(%error, "service overloaded");
		IntakeError::ServiceOverloaded
	} else {
		tracing::error!(%error, "unhandled tower error");
		IntakeError::Tower(error)
	}
}
