use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::State;
use axum::http::header;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info};

use pulse_core::events::ChangeEvent;
use pulse_core::ids::ConnectionId;

use crate::client::ClientRegistry;
use crate::error::ApiError;
use crate::server::AppState;

/// Unregisters the connection when the response body is dropped.
/// The transport close is the only cancellation primitive.
struct ConnectionGuard {
    id: ConnectionId,
    registry: Arc<ClientRegistry>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.unregister(&self.id);
        info!(
            connection_id = %self.id,
            clients = self.registry.count(),
            "stream closed"
        );
    }
}

pin_project_lite::pin_project! {
    /// SSE body: frames from the connection's sink, each one `data: <JSON>\n\n`.
    struct EventStream {
        #[pin]
        frames: ReceiverStream<String>,
        guard: ConnectionGuard,
    }
}

impl Stream for EventStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project()
            .frames
            .poll_next(cx)
            .map(|frame| frame.map(|frame| Ok(Event::default().data(frame))))
    }
}

/// Onboard one new subscriber: register, send the pending-transaction
/// snapshot, then hand the sink over to the dispatcher for the rest of
/// the connection's life.
pub async fn events_handler(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let (id, rx) = state.registry.register()?;
    info!(
        connection_id = %id,
        clients = state.registry.count(),
        "stream opened"
    );

    // Snapshot failure is logged, not fatal: the client starts empty and
    // catches up from live events.
    match state.transactions.pending_newest_first() {
        Ok(rows) => match ChangeEvent::initial_transactions(&rows).and_then(|e| e.to_frame()) {
            Ok(frame) => {
                state.registry.send_to(&id, frame);
            }
            Err(e) => {
                error!(connection_id = %id, error = %e, "failed to encode snapshot frame");
            }
        },
        Err(e) => {
            error!(connection_id = %id, error = %e, "snapshot query failed, stream starts empty");
        }
    }

    let stream = EventStream {
        frames: ReceiverStream::new(rx),
        guard: ConnectionGuard {
            id,
            registry: Arc::clone(&state.registry),
        },
    };

    Ok((
        [(header::CACHE_CONTROL, "no-cache")],
        Sse::new(stream).keep_alive(KeepAlive::default()),
    ))
}
