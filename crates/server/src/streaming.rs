//! SSE subscription streaming for channel events.
//!
//! The stream opens with a `connected` event, then polls the channel on a
//! 1-second cadence and emits each new event as `id:<seq>` with the event
//! JSON as data. The poll loop ends when the channel disappears; client
//! aborts simply drop the stream.

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use stratum_adapter::ChannelEvent;
use stratum_core::error::GatewayError;
use stratum_core::token::TokenClaims;
use stratum_service::channel::ChannelService;

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const POLL_BATCH: usize = 100;

struct PollState {
    channels: Arc<ChannelService>,
    claims: TokenClaims,
    after_seq: u64,
    pending: VecDeque<ChannelEvent>,
    connected_sent: bool,
}

pub fn subscribe_stream(
    channels: Arc<ChannelService>,
    claims: TokenClaims,
    after_seq: u64,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let state = PollState {
        channels,
        claims,
        after_seq,
        pending: VecDeque::new(),
        connected_sent: false,
    };

    let stream = futures::stream::unfold(state, |mut s| async move {
        if !s.connected_sent {
            s.connected_sent = true;
            return Some((Ok(Event::default().event("connected").data("{}")), s));
        }

        loop {
            if let Some(event) = s.pending.pop_front() {
                let data = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(_) => continue,
                };
                return Some((
                    Ok(Event::default().id(event.seq.to_string()).data(data)),
                    s,
                ));
            }

            match s
                .channels
                .read(&s.claims, s.after_seq, Some(POLL_BATCH), false)
                .await
            {
                Ok(page) if !page.events.is_empty() => {
                    if let Some(last) = page.events.last() {
                        s.after_seq = last.seq;
                    }
                    s.pending.extend(page.events);
                }
                Ok(_) => tokio::time::sleep(POLL_INTERVAL).await,
                // Channel deleted under the subscription: end the stream.
                Err(GatewayError::NotFound(_)) => return None,
                Err(e) => {
                    tracing::warn!(error = %e, "subscription poll failed, retrying");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text(""),
    )
}
