//! Server-sent-events endpoint: `GET /api/events` streams every event
//! published on the bus while the client stays connected.

use crate::bus::{EventBus, NEW_EMAIL};
use crate::model::IngestionEvent;
use anyhow::Result;
use axum::extract::State;
use axum::http::header;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::StreamExt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info};

pub const EVENTS_PATH: &str = "/api/events";

// Idle clients get a comment line this often; a failed write drops them
const KEEP_ALIVE: Duration = Duration::from_secs(15);

#[derive(Clone)]
struct PushState {
    bus: EventBus<IngestionEvent>,
    keep_alive: Duration,
}

async fn stream_events(State(state): State<PushState>) -> impl IntoResponse {
    let events = state.bus.subscribe(NEW_EMAIL);
    debug!(subscription = events.id(), "push client subscribed");
    // The subscription lives inside the response body and is dropped with the connection
    let frames = events.map(|event| Event::default().event(NEW_EMAIL).json_data(event));
    (
        [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        Sse::new(frames).keep_alive(KeepAlive::new().interval(state.keep_alive)),
    )
}

pub fn router(bus: EventBus<IngestionEvent>, keep_alive: Duration) -> Router {
    Router::new()
        .route(EVENTS_PATH, get(stream_events))
        .with_state(PushState { bus, keep_alive })
}

pub struct PushServer {
    listener: TcpListener,
    keep_alive: Duration,
}

impl PushServer {
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            keep_alive: KEEP_ALIVE,
        })
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves until the listener fails.
    pub async fn run(self, bus: EventBus<IngestionEvent>) -> Result<()> {
        let addr = self.listener.local_addr()?;
        info!(%addr, path = EVENTS_PATH, "push endpoint listening");
        axum::serve(self.listener, router(bus, self.keep_alive)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Category;
    use async_std::io::prelude::*;
    use async_std::io::BufReader;
    use async_std::net::TcpStream;
    use async_std::task;

    async fn start(keep_alive: Duration) -> (SocketAddr, EventBus<IngestionEvent>) {
        let bus = EventBus::new();
        let server = PushServer::bind("127.0.0.1:0")
            .await
            .unwrap()
            .with_keep_alive(keep_alive);
        let addr = server.local_addr().unwrap();
        task::spawn(server.run(bus.clone()));
        (addr, bus)
    }

    async fn open_stream(addr: SocketAddr) -> TcpStream {
        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET /api/events HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        client
    }

    async fn wait_for_subscribers(bus: &EventBus<IngestionEvent>, expected: usize) -> usize {
        for _ in 0..200 {
            if bus.subscriber_count(NEW_EMAIL) == expected {
                break;
            }
            task::sleep(Duration::from_millis(25)).await;
        }
        bus.subscriber_count(NEW_EMAIL)
    }

    #[async_std::test]
    async fn streams_published_events() {
        let (addr, bus) = start(KEEP_ALIVE).await;
        let client = open_stream(addr).await;
        assert_eq!(wait_for_subscribers(&bus, 1).await, 1);

        bus.publish(
            NEW_EMAIL,
            IngestionEvent {
                sender: "a@example.com".into(),
                subject: "Hi".into(),
                account: "Account-1".into(),
                category: Category::Spam,
                snippet: String::new(),
                date: "2026-10-18T00:00:00Z".into(),
            },
        );

        let mut reader = BufReader::new(client);
        let mut seen = String::new();
        while !seen.contains("\"subject\":\"Hi\"") {
            let mut line = String::new();
            if reader.read_line(&mut line).await.unwrap() == 0 {
                break;
            }
            seen.push_str(&line.replace('\r', ""));
        }
        assert!(seen.starts_with("HTTP/1.1 200 OK"));
        assert!(seen.to_ascii_lowercase().contains("text/event-stream"));
        assert!(seen.contains("event: new-email\n"));
        assert!(seen.contains("\"subject\":\"Hi\""));
    }

    #[async_std::test]
    async fn disconnected_clients_are_unsubscribed() {
        let (addr, bus) = start(Duration::from_millis(50)).await;
        let mut clients = Vec::new();
        for _ in 0..5 {
            clients.push(open_stream(addr).await);
        }
        assert_eq!(wait_for_subscribers(&bus, 5).await, 5);

        drop(clients);
        assert_eq!(wait_for_subscribers(&bus, 0).await, 0);
    }

    #[async_std::test]
    async fn other_paths_are_not_found() {
        let (addr, bus) = start(KEEP_ALIVE).await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET /api/health HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 404"));
        assert_eq!(bus.subscriber_count(NEW_EMAIL), 0);
    }
}
