use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::model::{RelayError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Something that happened on (or to) an upstream link, tagged with the link
/// generation it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Accepted { generation: u64 },
    /// The hub answered the handshake with 401.
    Rejected { generation: u64 },
    /// The link could not be opened.
    Failed { generation: u64, error: String },
    Message { generation: u64, text: String },
    /// A binary frame from the hub, passed on untouched.
    Binary { generation: u64, data: Vec<u8> },
    /// An established link went away.
    Closed { generation: u64 },
    /// The backoff timer scheduled for `generation` elapsed.
    RetryDue { generation: u64 },
}

/// Writer side of a running upstream link. Dropping it closes the link.
#[derive(Debug)]
pub struct UpstreamLink {
    outbound: UnboundedSender<String>,
}

impl UpstreamLink {
    pub fn send(&self, text: String) -> bool {
        self.outbound.send(text).is_ok()
    }
}

/// The hub URL with the session token attached as `key`.
pub fn handshake_url(central_url: &str, token: &str) -> Result<Url> {
    let mut url = Url::parse(central_url)
        .map_err(|e| RelayError::Upstream(format!("invalid hub url {central_url}: {e}")))?;
    url.query_pairs_mut().append_pair("key", token);
    Ok(url)
}

/// Open a link to `url` in the background; everything it observes is
/// reported on `events`.
pub fn spawn_link(url: Url, generation: u64, events: UnboundedSender<LinkEvent>) -> UpstreamLink {
    let (outbound, rx) = mpsc::unbounded_channel();
    tokio::spawn(run_link(url, generation, rx, events));
    UpstreamLink { outbound }
}

#[instrument(skip(url, outbound, events))]
async fn run_link(
    url: Url,
    generation: u64,
    mut outbound: UnboundedReceiver<String>,
    events: UnboundedSender<LinkEvent>,
) {
    debug!(host = ?url.host_str(), "Opening upstream link");
    let stream = match timeout(CONNECT_TIMEOUT, connect_async(url.as_str())).await {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(tungstenite::Error::Http(response)))
            if response.status() == StatusCode::UNAUTHORIZED =>
        {
            warn!("Hub returned 401, check the session key");
            let _ = events.send(LinkEvent::Rejected { generation });
            return;
        }
        Ok(Err(e)) => {
            error!(error = ?e, "Upstream connect failed");
            let _ = events.send(LinkEvent::Failed {
                generation,
                error: e.to_string(),
            });
            return;
        }
        Err(_) => {
            error!("Upstream connect timed out");
            let _ = events.send(LinkEvent::Failed {
                generation,
                error: "connect timed out".to_string(),
            });
            return;
        }
    };

    if events.send(LinkEvent::Accepted { generation }).is_err() {
        return;
    }
    let (mut sink, mut stream) = stream.split();

    loop {
        tokio::select! {
            text = outbound.recv() => match text {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        error!(error = ?e, "Failed to send upstream");
                        break;
                    }
                }
                None => {
                    // superseded or node shutting down
                    debug!("Closing upstream link");
                    let _ = sink.send(Message::Close(None)).await;
                    return;
                }
            },
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(LinkEvent::Message {
                        generation,
                        text: text.to_string(),
                    });
                }
                Some(Ok(Message::Binary(data))) => {
                    let _ = events.send(LinkEvent::Binary {
                        generation,
                        data: data.as_slice().to_vec(),
                    });
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(?frame, "Hub closed the link");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(error = ?e, "Upstream link error");
                    break;
                }
                None => break,
            },
        }
    }

    let _ = events.send(LinkEvent::Closed { generation });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_url_carries_key() {
        let url = handshake_url("ws://localhost:8090", "abc-123").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8090/?key=abc-123");
    }

    #[test]
    fn test_handshake_url_rejects_garbage() {
        assert!(matches!(
            handshake_url("not a url", "abc"),
            Err(RelayError::Upstream(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_hub_reports_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (events, mut rx) = mpsc::unbounded_channel();
        let url = handshake_url(&format!("ws://{addr}"), "abc").unwrap();
        let _link = spawn_link(url, 7, events);

        match rx.recv().await {
            Some(LinkEvent::Failed { generation, .. }) => assert_eq!(generation, 7),
            other => panic!("Expected failure, got {other:?}"),
        }
    }
}
