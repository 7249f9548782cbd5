use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::Extension,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::get,
};
use tokio_stream::{StreamExt, wrappers::BroadcastStream};

use crate::app::services::AppServices;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new().route("/stream", get(stream))
}

/// SSE stream of projection-update notifications.
///
/// Messages are fan-out filtered to their recipients, so a user only ever
/// sees updates about their own listings, orders and balance.
pub async fn stream(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = services.realtime_tx().subscribe();
    let user_id = principal.user_id();

    let stream = BroadcastStream::new(rx).filter_map(move |msg| match msg {
        Ok(m) if m.recipients.contains(&user_id) => {
            let data = serde_json::to_string(&m.payload).unwrap_or_else(|_| "{}".to_string());
            Some(Ok(SseEvent::default().event(m.topic).data(data)))
        }
        _ => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
