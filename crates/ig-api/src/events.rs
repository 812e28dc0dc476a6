use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream};
use std::convert::Infallible;
use tracing::debug;

use crate::auth::UserIdentity;
use crate::state::GatewayState;

/// Server-sent change events for the calling user.
///
/// The hub connection lives as long as the stream; dropping the response
/// closes the receiver and the hub prunes it on the next delivery.
pub async fn event_stream(
    State(state): State<GatewayState>,
    UserIdentity(user_id): UserIdentity,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.hub.connect(&user_id);
    debug!(user_id = %user_id, connection = %subscription.id, "Event stream opened");

    let events = stream::unfold(subscription.receiver, |mut receiver| async move {
        let payload = receiver.recv().await?;
        let event = Event::default().event("change").data(String::from_utf8_lossy(&payload));
        Some((Ok(event), receiver))
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
