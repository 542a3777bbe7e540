//! WebSocket push of job events.
//!
//! `GET /ws/jobs/:job_id` upgrades, sends the job's current status, then
//! forwards progress, status changes and the terminal event. The server pings
//! on an interval and closes after the final event.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use reel_models::{JobEvent, JobEventKind, JobId};

use crate::error::ApiResult;
use crate::handlers::jobs::parse_job_id;
use crate::metrics;
use crate::state::AppState;

static ACTIVE_WS_CONNECTIONS: AtomicI64 = AtomicI64::new(0);

/// WS /ws/jobs/:job_id
pub async fn ws_job_events(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let job_id = parse_job_id(&job_id)?;
    // unknown jobs get a plain 404 instead of an upgrade
    state.jobs.status(&job_id).await?;

    Ok(ws.on_upgrade(move |socket| async move {
        let _connection = ActiveConnection::open();
        let heartbeat = state.config.ws_heartbeat;
        stream_job_events(socket, state, job_id, heartbeat).await;
    }))
}

/// Counts one upgraded socket for as long as it lives.
struct ActiveConnection;

impl ActiveConnection {
    fn open() -> Self {
        let count = ACTIVE_WS_CONNECTIONS.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_ws_active_connections(count);
        metrics::record_ws_connection();
        Self
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        let count = ACTIVE_WS_CONNECTIONS.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_ws_active_connections(count);
    }
}

fn event_type(event: &JobEvent) -> &'static str {
    match event.kind {
        JobEventKind::Progress { .. } => "progress",
        JobEventKind::Status { .. } => "status",
        JobEventKind::Error { .. } => "error",
        JobEventKind::Done { .. } => "done",
    }
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &JobEvent) -> bool {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize job event: {}", e);
            return false;
        }
    };
    if sender.send(Message::Text(json)).await.is_err() {
        return false;
    }
    metrics::record_ws_message_sent(event_type(event));
    true
}

async fn stream_job_events(socket: WebSocket, state: AppState, job_id: JobId, heartbeat: Duration) {
    let (mut sender, mut receiver) = socket.split();

    // subscribe before the snapshot so no transition falls between them
    let mut events = state.jobs.subscribe(&job_id);
    let snapshot = match state.jobs.status(&job_id).await {
        Ok(job) => job,
        Err(e) => {
            let event = JobEvent::error(job_id.clone(), e.to_string(), false);
            send_event(&mut sender, &event).await;
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    info!(job_id = %job_id, status = %snapshot.status, "Job event stream opened");
    let status = JobEvent::status(job_id.clone(), snapshot.status, snapshot.retry_count);
    if !send_event(&mut sender, &status).await {
        return;
    }
    if snapshot.status.is_terminal() {
        let _ = sender.send(Message::Close(None)).await;
        return;
    }
    if snapshot.progress > 0.0 {
        let progress = JobEvent::progress(job_id.clone(), snapshot.progress, snapshot.progress_message.clone());
        if !send_event(&mut sender, &progress).await {
            return;
        }
    }

    let mut ping = tokio::time::interval(heartbeat.max(Duration::from_secs(1)));
    ping.tick().await;

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                let last = event.is_final();
                if !send_event(&mut sender, &event).await || last {
                    break;
                }
            }
            _ = ping.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    debug!(job_id = %job_id, "Client closed job event stream");
                    return;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    let _ = sender.send(Message::Close(None)).await;
    debug!(job_id = %job_id, "Job event stream closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active() -> i64 {
        ACTIVE_WS_CONNECTIONS.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn test_gauge_tracks_live_sockets_only() {
        let before = active();
        let first = ActiveConnection::open();
        assert_eq!(active(), before + 1);

        // a socket task torn down mid-stream still releases its slot
        let (opened_tx, opened_rx) = tokio::sync::oneshot::channel();
        let task = tokio::spawn(async move {
            let _connection = ActiveConnection::open();
            let _ = opened_tx.send(());
            std::future::pending::<()>().await;
        });
        opened_rx.await.unwrap();
        assert_eq!(active(), before + 2);
        task.abort();
        let _ = task.await;
        assert_eq!(active(), before + 1);

        drop(first);
        assert_eq!(active(), before);
    }
}
