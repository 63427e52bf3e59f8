use std::net::SocketAddr;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Path, State};
use axum::response::IntoResponse;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use transcription_events::StageCode;
use uuid::Uuid;

use crate::state::AppState;

/// `GET /ws/:job_id` — per-client admission via `ConnectionGuard`, then
/// forwards every `ProgressEvent` published for this job until the worker
/// reports a terminal `stage_code` (`Completed` or `Failed`) or the client
/// disconnects.
pub async fn ws_upgrade(State(state): State<AppState>, Path(job_id): Path<Uuid>, ConnectInfo(addr): ConnectInfo<SocketAddr>, ws: WebSocketUpgrade) -> impl IntoResponse {
	ws.on_upgrade(move |socket| handle_socket(socket, state, job_id, addr.ip().to_string()))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, job_id: Uuid, client_id: String) {
	let permit = match state.connection_guard.acquire(client_id.clone()).await {
		Ok(permit) => permit,
		Err(error) => {
			warn!(%client_id, %error, "websocket connection rejected");
			let _ = socket.send(Message::Close(None)).await;
			return;
		}
	};

	state.metrics.ws_sessions_opened.add(1, &[]);
	let mut events = state.event_bus.subscribe(job_id);
	info!(%job_id, %client_id, "gateway subscribed to job progress");

	let mut job_finished = false;

	loop {
		tokio::select! {
			event = events.recv() => {
				match event {
					Ok(event) => {
						job_finished = event.stage_code != StageCode::Processing;
						let payload = match serde_json::to_string(&event) {
							Ok(payload) => payload,
							Err(error) => {
								warn!(%error, "failed to serialize progress event");
								continue;
							}
						};
						if socket.send(Message::Text(payload)).await.is_err() {
							break;
						}
						if job_finished {
							break;
						}
					}
					Err(RecvError::Lagged(skipped)) => {
						warn!(%job_id, skipped, "gateway dropped progress events, client is lagging");
					}
					Err(RecvError::Closed) => break,
				}
			}
			incoming = socket.recv() => {
				match incoming {
					Some(Ok(Message::Close(_))) | None => break,
					Some(Ok(_)) => {}
					Some(Err(error)) => {
						warn!(%error, "websocket receive error");
						break;
					}
				}
			}
		}
	}

	permit.release();
	// Only the client that actually observed job completion retires the
	// per-job channel — an early disconnect must not cut off other clients
	// still watching the same job_id.
	if job_finished {
		state.event_bus.forget(job_id);
	}
	info!(%job_id, %client_id, "gateway websocket session closed");
}
