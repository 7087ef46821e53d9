//! Per-connection handler: request dispatch and event push.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Wait for either a client frame, a room event, or the idle deadline
//!   2. Frame → decode `ClientEnvelope` → dispatch → reply with `replyTo`
//!   3. Event → forward to the client if it is subscribed to that room
//!
//! There is no handshake: every request carries what it needs
//! (a credential, or a session id plus room), so a connection can talk
//! to several rooms and a client can reconnect without ceremony.

use std::sync::Arc;

use ephemera_protocol::{
    ClientEnvelope, Codec, Event, Request, Response, RoomName, ServerEnvelope, ServerPayload,
    SessionId,
};
use ephemera_transport::{Connection, TransportError, WebSocketConnection};
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::EphemeraError;
use crate::server::ServerState;

/// The room this connection is receiving pushed events for.
struct Subscription {
    room: RoomName,
    session_id: SessionId,
    events: broadcast::Receiver<Event>,
}

/// Whatever woke the connection loop up.
enum Wakeup {
    Frame(Result<Option<Vec<u8>>, TransportError>),
    Event(Result<Event, broadcast::error::RecvError>),
    Idle,
}

/// Outgoing frame numbering for one connection.
struct Outbox<'a, C: Codec> {
    conn: &'a WebSocketConnection,
    codec: &'a C,
    seq: u64,
}

impl<C: Codec> Outbox<'_, C> {
    async fn send(&mut self, payload: ServerPayload) -> Result<(), EphemeraError> {
        let envelope = ServerEnvelope {
            seq: next_seq(&mut self.seq),
            payload,
        };
        let bytes = self.codec.encode(&envelope)?;
        self.conn.send(&bytes).await?;
        Ok(())
    }

    async fn reply(&mut self, reply_to: u64, response: Response) -> Result<(), EphemeraError> {
        self.send(ServerPayload::Response { reply_to, response }).await
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<C: Codec>(
    conn: WebSocketConnection,
    state: Arc<ServerState<C>>,
) -> Result<(), EphemeraError> {
    let conn_id = conn.id();
    tracing::debug!(%conn_id, peer = %conn.peer_addr(), "handling new connection");

    let mut outbox = Outbox {
        conn: &conn,
        codec: &state.codec,
        seq: 1,
    };
    let mut subscription: Option<Subscription> = None;
    let mut deadline = Instant::now() + state.idle_timeout;

    loop {
        let wakeup = tokio::select! {
            frame = conn.recv() => Wakeup::Frame(frame),
            event = next_event(&mut subscription) => Wakeup::Event(event),
            () = tokio::time::sleep_until(deadline) => Wakeup::Idle,
        };

        match wakeup {
            Wakeup::Frame(Ok(Some(data))) => {
                deadline = Instant::now() + state.idle_timeout;
                handle_frame(&state, &mut outbox, &mut subscription, &data).await?;
            }
            Wakeup::Frame(Ok(None)) => {
                tracing::info!(%conn_id, "connection closed cleanly");
                break;
            }
            Wakeup::Frame(Err(e)) => {
                tracing::debug!(%conn_id, error = %e, "recv error");
                break;
            }
            Wakeup::Event(Ok(event)) => {
                if let Some(event) = personalize(&state, subscription.as_ref(), event) {
                    outbox.send(ServerPayload::Event(event)).await?;
                }
            }
            Wakeup::Event(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                tracing::debug!(%conn_id, skipped, "subscriber lagged, events dropped");
            }
            Wakeup::Event(Err(broadcast::error::RecvError::Closed)) => {
                subscription = None;
            }
            Wakeup::Idle => {
                tracing::info!(%conn_id, "connection idle, closing");
                if let Err(e) = conn.close().await {
                    tracing::debug!(%conn_id, error = %e, "close failed");
                }
                break;
            }
        }
    }

    Ok(())
}

/// Waits for the next room event, or forever when not subscribed.
async fn next_event(
    subscription: &mut Option<Subscription>,
) -> Result<Event, broadcast::error::RecvError> {
    match subscription {
        Some(sub) => sub.events.recv().await,
        None => std::future::pending().await,
    }
}

/// Decodes one client frame and answers it.
async fn handle_frame<C: Codec>(
    state: &ServerState<C>,
    outbox: &mut Outbox<'_, C>,
    subscription: &mut Option<Subscription>,
    data: &[u8],
) -> Result<(), EphemeraError> {
    let envelope: ClientEnvelope = match state.codec.decode(data) {
        Ok(env) => env,
        Err(e) => {
            // Echo the id back if at least that much parsed.
            let reply_to = state
                .codec
                .decode::<EnvelopeId>(data)
                .map_or(0, |envelope| envelope.id);
            tracing::debug!(reply_to, error = %e, "failed to decode envelope");
            let err = EphemeraError::from(e);
            let response = Response::error(err.kind(), err.client_message());
            return outbox.reply(reply_to, response).await;
        }
    };

    let name = envelope.request.name();
    let response = match dispatch(state, subscription, envelope.request) {
        Ok(response) => response,
        Err(err) => {
            let kind = err.kind();
            if kind.status() >= 500 {
                tracing::warn!(request = name, error = %err, "request failed");
            } else {
                tracing::debug!(request = name, %kind, error = %err, "request rejected");
            }
            Response::error(kind, err.client_message())
        }
    };
    outbox.reply(envelope.id, response).await
}

/// Just enough of a `ClientEnvelope` to address an error reply.
#[derive(Deserialize)]
struct EnvelopeId {
    id: u64,
}

/// Runs one request against the services.
fn dispatch<C: Codec>(
    state: &ServerState<C>,
    subscription: &mut Option<Subscription>,
    request: Request,
) -> Result<Response, EphemeraError> {
    match request {
        Request::Authenticate {
            credential,
            room_name,
        } => {
            let session = state.tokens.validate_or_create(&credential, &room_name)?;
            Ok(Response::Authenticated {
                session_id: session.session_id,
                room_name: session.room,
            })
        }

        Request::ListMessages { room_name } => {
            let messages = state.ledger.list(&room_name)?;
            Ok(Response::Messages {
                messages: messages.iter().map(|m| m.to_view()).collect(),
            })
        }

        Request::PostMessage {
            session_id,
            room_name,
            content,
            user_label,
        } => {
            let message =
                state
                    .ledger
                    .post(&session_id, &room_name, &content, user_label.as_deref())?;
            // Sending ends typing. The message is already stored, so a
            // failure here must not fail the post.
            if let Err(e) = state.presence.clear(&session_id, &room_name) {
                tracing::warn!(%session_id, error = %e, "could not clear typing after post");
            }
            Ok(Response::MessagePosted {
                message: message.to_view(),
            })
        }

        Request::SetTyping {
            session_id,
            room_name,
            user_label,
            is_typing,
        } => {
            let typing_users = state.presence.set_typing(
                &session_id,
                &room_name,
                user_label.as_deref(),
                is_typing,
            )?;
            Ok(Response::TypingUsers { typing_users })
        }

        Request::Subscribe {
            session_id,
            room_name,
        } => {
            state.tokens.resolve(&session_id, &room_name)?;
            let events = state.hub.subscribe(&room_name);
            tracing::debug!(%session_id, room = %room_name, "subscribed");
            *subscription = Some(Subscription {
                room: room_name.clone(),
                session_id,
                events,
            });
            Ok(Response::Subscribed { room_name })
        }

        Request::Unsubscribe => {
            *subscription = None;
            Ok(Response::Unsubscribed)
        }

        Request::Ping { client_time } => Ok(Response::Pong {
            client_time,
            server_time: u64::try_from(state.clock.now().timestamp_millis()).unwrap_or(0),
        }),
    }
}

/// Tailors a room event to this subscriber.
///
/// Typing snapshots are recomputed without the subscriber's own label,
/// so nobody is told that they themselves are typing.
fn personalize<C: Codec>(
    state: &ServerState<C>,
    subscription: Option<&Subscription>,
    event: Event,
) -> Option<Event> {
    let sub = subscription?;
    match event {
        Event::TypingChanged { room_name, .. } if room_name == sub.room => {
            match state.presence.typing_users_except(&room_name, &sub.session_id) {
                Ok(typing_users) => Some(Event::TypingChanged {
                    room_name,
                    typing_users,
                }),
                Err(e) => {
                    tracing::debug!(error = %e, "dropping typing event");
                    None
                }
            }
        }
        Event::MessageCreated { message } if message.room_name == sub.room => {
            Some(Event::MessageCreated { message })
        }
        _ => None,
    }
}

/// Increments and returns the next sequence number.
fn next_seq(seq: &mut u64) -> u64 {
    let current = *seq;
    *seq += 1;
    current
}
