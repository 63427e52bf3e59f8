use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobQueueError {
	#[error("redis error: {0}")]
	Redis(#[from] redis::RedisError),
	#[error("serialization error: {0}")]
	Json(#[from] serde_json::Error),
	#[error("metrics registration error: {0}")]
	Metrics(#[from] prometheus::Error),
	#[error("job handler failed: {0}")]
	HandlerFailed(String),
	#[error("job timed out before the handler returned")]
	Timeout,
	#[error("result channel closed while workers were still running")]
	ResultChannelClosed,
}
