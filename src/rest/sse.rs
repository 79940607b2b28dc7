// SPDX-License-Identifier: MIT
// rest/sse.rs — progress stream bridge.
//
// Turns one generation run's ProgressEvent channel into a Server-Sent
// Events response. Each event is named after its kind and carries the full
// event JSON as data, so browser clients can `addEventListener("progress")`
// or just parse every message.

use axum::response::sse::{Event, KeepAlive, Sse};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, Stream, StreamExt};

use crate::events::ProgressEvent;

pub fn event_stream(
    rx: mpsc::Receiver<ProgressEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = ReceiverStream::new(rx).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok(Event::default().event(event.kind.as_str()).data(data))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
