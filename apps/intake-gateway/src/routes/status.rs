use axum::extract::FromRef;
use axum::http::Method;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::handlers::status as handlers;
use crate::state::AppState;

pub fn status_routes<S>() -> Router<S>
where
	S: Clone + Send + Sync + 'static,
	AppState: FromRef<S>,
{
	let cors = CorsLayer::new().allow_origin(Any).allow_methods([Method::GET]).allow_headers(Any);

	Router::new().route("/status/:job_id", get(handlers::status)).layer(cors)
}
