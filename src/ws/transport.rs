//! Transport seam: the driver only sees a text sink and a stream of
//! [`Incoming`] items, so tests can substitute an in-memory link.

use std::pin::Pin;

use async_trait::async_trait;
use feedsync_shared::{is_auth_close_code, CLOSE_NORMAL};
use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, protocol::CloseFrame, Message};
use url::Url;

use super::connection::CloseCause;
use crate::error::TransportError;

pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Incoming, TransportError>> + Send>>;

/// What the read half yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Text(String),
    /// Transport-level keepalive (ping/pong). Counts toward liveness only.
    Activity,
    Closed(CloseCause),
}

/// An open duplex link, split into halves.
pub struct Link {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Link, TransportError>;
}

/// Builds the authenticated endpoint URL. The token travels as a query
/// parameter because browser WebSocket clients cannot set headers.
pub fn endpoint_url(base: &str, token: &str) -> Result<String, TransportError> {
    let mut url = Url::parse(base).map_err(|e| TransportError::Connect(format!("{base}: {e}")))?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url.into())
}

/// Maps a close code from the peer onto a [`CloseCause`].
pub fn close_cause(code: u16, reason: &str) -> CloseCause {
    if code == CLOSE_NORMAL {
        CloseCause::Clean
    } else if is_auth_close_code(code) {
        CloseCause::Failed(TransportError::Auth(if reason.is_empty() {
            format!("closed with code {code}")
        } else {
            reason.to_string()
        }))
    } else {
        CloseCause::Failed(TransportError::Closed {
            code,
            reason: reason.to_string(),
        })
    }
}

/// WebSocket transport backed by tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Link, TransportError> {
        let (ws_stream, _response) = connect_async(url).await.map_err(handshake_error)?;
        let (write, read) = ws_stream.split();

        let sink = write
            .with(|text: String| future::ready(Ok::<_, tungstenite::Error>(Message::text(text))))
            .sink_map_err(|e| TransportError::Io(e.to_string()));

        let stream = read.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(Incoming::Text(text.as_str().to_owned()))),
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => Some(Ok(Incoming::Activity)),
                Ok(Message::Close(frame)) => Some(Ok(Incoming::Closed(close_frame_cause(frame)))),
                Ok(Message::Binary(_)) | Ok(Message::Frame(_)) => None,
                Err(e) => Some(Err(read_error(e))),
            })
        });

        Ok(Link {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

fn close_frame_cause(frame: Option<CloseFrame>) -> CloseCause {
    match frame {
        Some(frame) => close_cause(u16::from(frame.code), frame.reason.as_str()),
        // A close without a status is treated as abnormal.
        None => CloseCause::Failed(TransportError::Closed {
            code: 1005,
            reason: String::new(),
        }),
    }
}

fn handshake_error(error: tungstenite::Error) -> TransportError {
    match error {
        tungstenite::Error::Http(response) => {
            let status = response.status().as_u16();
            if status == 401 || status == 403 {
                TransportError::Auth(format!("handshake rejected with HTTP {status}"))
            } else {
                TransportError::Connect(format!("handshake failed with HTTP {status}"))
            }
        }
        other => TransportError::Connect(other.to_string()),
    }
}

fn read_error(error: tungstenite::Error) -> TransportError {
    match error {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::Closed {
                code: 1006,
                reason: error.to_string(),
            }
        }
        other => TransportError::Io(other.to_string()),
    }
}
