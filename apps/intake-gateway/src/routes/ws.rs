use axum::extract::FromRef;
use axum::routing::get;
use axum::Router;

use crate::handlers::ws as handlers;
use crate::state::AppState;

pub fn ws_routes<S>() -> Router<S>
where
	S: Clone + Send + Sync + 'static,
	AppState: FromRef<S>,
{
	Router::new().route("/ws/:job_id", get(handlers::ws_upgrade))
}
