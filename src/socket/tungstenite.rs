//! [`Connector`] backed by `tokio-tungstenite`.

use std::io;

use futures::{SinkExt as _, StreamExt as _};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use super::{
    ConnectRequest, Connector, Outgoing, SocketError, SocketErrorKind, SocketEvents, SocketHandle,
};
use crate::types::{CloseCode, Payload};

/// Opens real WebSocket connections, one tokio task per socket.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

impl Connector for TungsteniteConnector {
    fn connect(&self, request: ConnectRequest<'_>, events: SocketEvents) -> SocketHandle {
        let (handle, outgoing) = SocketHandle::channel();

        match build_request(request) {
            Ok(http_request) => {
                let connect_timeout = request.connect_timeout;
                tokio::spawn(async move {
                    run_socket(http_request, connect_timeout, events, outgoing).await;
                });
            }
            Err(e) => {
                events.error(e);
                events.close(CloseCode::ABNORMAL, None);
            }
        }

        handle
    }
}

fn build_request(request: ConnectRequest<'_>) -> Result<Request, SocketError> {
    let mut http_request = request
        .address
        .as_str()
        .into_client_request()
        .map_err(|e| classify(&e))?;

    if !request.protocols.is_empty() {
        let protocols = HeaderValue::from_str(&request.protocols.join(", "))
            .map_err(|e| SocketError::new(SocketErrorKind::Other, e.to_string()))?;
        http_request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, protocols);
    }

    Ok(http_request)
}

/// Drive one socket from handshake to close, reporting through `events`.
async fn run_socket(
    request: Request,
    connect_timeout: std::time::Duration,
    events: SocketEvents,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
) {
    let stream = match timeout(connect_timeout, connect_async(request)).await {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(e)) => {
            events.error(classify(&e));
            events.close(CloseCode::ABNORMAL, None);
            return;
        }
        Err(_elapsed) => {
            events.error(SocketError::new(
                SocketErrorKind::TimedOut,
                format!("no handshake within {connect_timeout:?}"),
            ));
            events.close(CloseCode::ABNORMAL, None);
            return;
        }
    };

    events.open();

    let (mut write, mut read) = stream.split();
    // Close status received from the peer, reported once the stream has drained.
    let mut closing: Option<(CloseCode, Option<String>)> = None;

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        #[cfg(feature = "tracing")]
                        tracing::trace!(%text, "Received WebSocket text message");
                        events.message(Payload::Text(text.to_string()));
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        events.message(Payload::Binary(bytes.to_vec()));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        closing = Some(frame.map_or((CloseCode::NO_STATUS, None), |frame| {
                            let reason = frame.reason.to_string();
                            (
                                CloseCode::new(frame.code.into()),
                                (!reason.is_empty()).then_some(reason),
                            )
                        }));
                    }
                    Some(Ok(_)) => {
                        // Ping, pong and raw frames are handled by tungstenite.
                    }
                    Some(Err(e)) => {
                        if closing.is_none() && !matches!(e, WsError::ConnectionClosed) {
                            events.error(classify(&e));
                        }
                        break;
                    }
                    None => break,
                }
            }

            cmd = outgoing.recv() => {
                match cmd {
                    Some(Outgoing::Frame(payload)) => {
                        let message = match payload {
                            Payload::Text(text) => Message::Text(text.into()),
                            Payload::Binary(bytes) => Message::Binary(bytes.into()),
                        };
                        if let Err(e) = write.send(message).await {
                            #[cfg(feature = "tracing")]
                            tracing::warn!(error = %e, "Failed to write WebSocket frame");
                            #[cfg(not(feature = "tracing"))]
                            let _ = &e;
                        }
                    }
                    Some(Outgoing::Close { code, reason }) => {
                        let frame = CloseFrame {
                            code: u16::from(code).into(),
                            reason: reason.unwrap_or_default().into(),
                        };
                        if write.send(Message::Close(Some(frame))).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        // Handle dropped: the socket was replaced or torn down.
                        _ = write.close().await;
                        return;
                    }
                }
            }
        }
    }

    let (code, reason) = closing.unwrap_or((CloseCode::ABNORMAL, None));
    events.close(code, reason);
}

fn classify(error: &WsError) -> SocketError {
    let kind = match error {
        WsError::Io(io_error) if io_error.kind() == io::ErrorKind::ConnectionRefused => {
            SocketErrorKind::ConnectionRefused
        }
        WsError::Io(io_error) if io_error.kind() == io::ErrorKind::TimedOut => {
            SocketErrorKind::TimedOut
        }
        _ => SocketErrorKind::Other,
    };

    SocketError::new(kind, error.to_string())
}
