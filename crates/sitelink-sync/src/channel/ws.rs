//! WebSocket transport for the push channel.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use sitelink_proto::{ClientFrame, ServerFrame, SubscriptionId};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};
use url::Url;
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::credential::Credential;
use crate::error::{SyncError, SyncResult};

use super::transport::{BoxFuture, Connector, Inbound, Link};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens push channel links over WebSocket.
///
/// The credential travels as an `Authorization: Bearer` header on the
/// upgrade request; individual frames carry no credential.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: Url,
    ping_interval: Option<Duration>,
}

impl WsConnector {
    /// Create a connector for the given `ws://` or `wss://` endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or not a WebSocket URL.
    pub fn new(url: &str, config: &SyncConfig) -> SyncResult<Self> {
        let url = Url::parse(url)
            .map_err(|e| SyncError::Config(format!("invalid push server url '{url}': {e}")))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(SyncError::Config(format!(
                "push server url must use ws:// or wss://, got {}://",
                url.scheme()
            )));
        }
        Ok(Self {
            url,
            ping_interval: config.ping_interval,
        })
    }

    /// The endpoint this connector dials.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    fn build_request(
        &self,
        credential: &Credential,
    ) -> SyncResult<tungstenite::handshake::client::Request> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| SyncError::Transport(format!("failed to build request: {e}")))?;
        let header = HeaderValue::from_str(&credential.authorization_header())
            .map_err(|e| SyncError::InvalidCredential(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, header);
        Ok(request)
    }
}

impl Connector for WsConnector {
    fn open<'a>(
        &'a self,
        credential: &'a Credential,
        inbound: mpsc::Sender<Inbound>,
    ) -> BoxFuture<'a, SyncResult<Arc<dyn Link>>> {
        Box::pin(async move {
            let request = self.build_request(credential)?;
            let (ws_stream, _) = tokio_tungstenite::connect_async(request)
                .await
                .map_err(map_connect_error)?;

            let connection_id = Uuid::new_v4();
            debug!(%connection_id, url = %self.url, "websocket established");

            let (write, read) = ws_stream.split();
            let (frame_tx, frame_rx) = mpsc::unbounded_channel::<ClientFrame>();

            tokio::spawn(writer_task(write, frame_rx, self.ping_interval, connection_id));
            let reader = tokio::spawn(reader_task(read, inbound, connection_id));

            let link: Arc<dyn Link> = Arc::new(WsLink {
                connection_id,
                frames: Mutex::new(Some(frame_tx)),
                reader: Mutex::new(Some(reader)),
            });
            Ok(link)
        })
    }
}

fn map_connect_error(err: tungstenite::Error) -> SyncError {
    match err {
        tungstenite::Error::Http(response)
            if matches!(
                response.status(),
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
            ) =>
        {
            SyncError::Unauthorized
        }
        tungstenite::Error::Http(response) => SyncError::Http {
            status: response.status().as_u16(),
            message: "websocket upgrade rejected".to_string(),
        },
        other => SyncError::Transport(other.to_string()),
    }
}

/// A live WebSocket link.
///
/// Frames are queued to a writer task; closing the link drops the queue,
/// which makes the writer send a close frame and exit.
pub struct WsLink {
    connection_id: Uuid,
    frames: Mutex<Option<mpsc::UnboundedSender<ClientFrame>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl WsLink {
    /// Identifier used in logs for this link.
    #[must_use]
    pub const fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    fn send(&self, frame: ClientFrame) -> SyncResult<()> {
        let frames = self.frames.lock();
        let tx = frames.as_ref().ok_or(SyncError::LinkClosed)?;
        tx.send(frame).map_err(|_| SyncError::LinkClosed)
    }
}

impl Link for WsLink {
    fn subscribe(&self, id: &SubscriptionId, topic: &str) -> SyncResult<()> {
        self.send(ClientFrame::subscribe(id.clone(), topic))
    }

    fn unsubscribe(&self, id: &SubscriptionId) -> SyncResult<()> {
        self.send(ClientFrame::unsubscribe(id.clone()))
    }

    fn close(&self) {
        if self.frames.lock().take().is_some() {
            debug!(connection_id = %self.connection_id, "closing websocket link");
        }
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }
}

impl Drop for WsLink {
    fn drop(&mut self) {
        self.close();
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn writer_task(
    mut write: SplitSink<WsStream, Message>,
    mut frames: mpsc::UnboundedReceiver<ClientFrame>,
    ping_interval: Option<Duration>,
    connection_id: Uuid,
) {
    let mut ping_timer = ping_interval.map(|period| interval_at(Instant::now() + period, period));

    loop {
        let frame = tokio::select! {
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },
            () = tick(&mut ping_timer) => ClientFrame::Ping,
        };

        match frame.to_json() {
            Ok(json) => {
                if let Err(e) = write.send(Message::Text(json.into())).await {
                    debug!(%connection_id, error = %e, "websocket write failed");
                    break;
                }
            }
            Err(e) => {
                warn!(%connection_id, error = %e, "failed to serialize client frame");
            }
        }
    }
}

async fn reader_task(
    mut read: SplitStream<WsStream>,
    inbound: mpsc::Sender<Inbound>,
    connection_id: Uuid,
) {
    let reason = loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => match ServerFrame::from_json(text.as_str()) {
                Ok(ServerFrame::Message {
                    subscription,
                    topic,
                    body,
                }) => {
                    let event = Inbound::Message {
                        subscription,
                        topic,
                        body,
                    };
                    if inbound.send(event).await.is_err() {
                        return;
                    }
                }
                Ok(ServerFrame::Error { message }) => {
                    warn!(%connection_id, %message, "push server reported an error");
                }
                Ok(ServerFrame::Pong) => {
                    trace!(%connection_id, "pong");
                }
                Err(e) => {
                    warn!(%connection_id, error = %e, "failed to decode server frame");
                }
            },
            Some(Ok(Message::Close(_))) => break "server closed connection".to_string(),
            Some(Ok(_)) => {
                // Ping, Pong and Binary frames carry nothing for us
            }
            Some(Err(e)) => break format!("websocket error: {e}"),
            None => break "connection closed".to_string(),
        }
    };

    debug!(%connection_id, %reason, "websocket reader finished");
    let _ = inbound.send(Inbound::Closed { reason }).await;
}
