use axum::extract::FromRef;
use axum::http::header::CONTENT_TYPE;
use axum::http::Method;
use axum::routing::post;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::handlers::submit_url as handlers;
use crate::state::AppState;

pub fn submit_url_routes<S>() -> Router<S>
where
	S: Clone + Send + Sync + 'static,
	AppState: FromRef<S>,
{
	let cors = CorsLayer::new().allow_origin(Any).allow_methods([Method::POST]).allow_headers([CONTENT_TYPE]);

	Router::new().route("/submit_url", post(handlers::submit_url)).layer(cors)
}
