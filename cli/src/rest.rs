//! `RemoteStore` over the `hearth serve` HTTP API.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tokio::sync::watch;

use hearth_core::error::{Result, SyncError};
use hearth_core::remote::{FeedSink, Query, RemoteStore, Row, Session, Subscription, Table};

use crate::wire::{EventStreamDecoder, encode_query};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const RECONNECT_MIN: Duration = Duration::from_millis(250);
const RECONNECT_MAX: Duration = Duration::from_secs(30);

pub struct RestRemote {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    session: watch::Sender<Option<Session>>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl RestRemote {
    pub fn new(base_url: &str, api_key: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("hearth/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        let (session, _) = watch::channel(None);
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            session,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(&self.api_key)
    }

    /// Send and map transport failures and error statuses onto `SyncError`.
    async fn send(&self, table: Table, id: Option<i64>, request: RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => status.to_string(),
        };
        Err(match (status, id) {
            (StatusCode::NOT_FOUND, Some(id)) => SyncError::NotFound { table, id },
            (StatusCode::UNAUTHORIZED, _) => {
                SyncError::Configuration(format!("API key rejected: {message}"))
            }
            _ => SyncError::remote(table, message),
        })
    }

    async fn json<T: serde::de::DeserializeOwned>(table: Table, response: Response) -> Result<T> {
        response
            .json()
            .await
            .map_err(|e| SyncError::remote(table, format!("unexpected response: {e}")))
    }
}

#[async_trait]
impl RemoteStore for RestRemote {
    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Row>> {
        let request = self
            .request(Method::GET, &format!("/api/tables/{table}"))
            .query(&encode_query(query))
            .timeout(REQUEST_TIMEOUT);
        let response = self.send(table, None, request).await?;
        Self::json(table, response).await
    }

    async fn insert(&self, table: Table, row: Row) -> Result<Row> {
        let request = self
            .request(Method::POST, &format!("/api/tables/{table}"))
            .json(&row)
            .timeout(REQUEST_TIMEOUT);
        let response = self.send(table, None, request).await?;
        Self::json(table, response).await
    }

    async fn update(&self, table: Table, id: i64, patch: Row) -> Result<()> {
        let request = self
            .request(Method::PATCH, &format!("/api/tables/{table}/{id}"))
            .json(&patch)
            .timeout(REQUEST_TIMEOUT);
        self.send(table, Some(id), request).await.map(drop)
    }

    async fn delete(&self, table: Table, id: i64) -> Result<()> {
        let request = self
            .request(Method::DELETE, &format!("/api/tables/{table}/{id}"))
            .timeout(REQUEST_TIMEOUT);
        self.send(table, Some(id), request).await.map(drop)
    }

    async fn get_session(&self) -> Result<Option<Session>> {
        let response = self
            .request(Method::GET, "/api/session")
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;
        let session = match response.status() {
            StatusCode::UNAUTHORIZED => None,
            status if status.is_success() => response
                .json::<Option<Session>>()
                .await
                .map_err(|e| SyncError::Network(format!("unexpected session response: {e}")))?,
            status => return Err(SyncError::Network(format!("session check failed: {status}"))),
        };
        self.session.send_if_modified(|current| {
            if *current == session {
                false
            } else {
                current.clone_from(&session);
                true
            }
        });
        Ok(session)
    }

    fn on_session_change(&self) -> watch::Receiver<Option<Session>> {
        self.session.subscribe()
    }

    async fn subscribe_changes(&self, table: Table, sink: FeedSink) -> Result<Subscription> {
        let path = format!("/api/changes/{table}");
        let response = self
            .send(table, None, self.request(Method::GET, &path))
            .await?;

        let stream = ChangeStream {
            client: self.client.clone(),
            url: format!("{}{path}", self.base_url),
            api_key: self.api_key.clone(),
            table,
            sink,
        };
        let task = tokio::spawn(stream.run(response));
        Ok(Subscription::new(table, move || task.abort()))
    }
}

enum StreamEnd {
    SinkClosed,
    Dropped(String),
}

/// One table's server-sent change stream. A dropped connection is reopened
/// with backoff until the subscriber goes away.
struct ChangeStream {
    client: reqwest::Client,
    url: String,
    api_key: String,
    table: Table,
    sink: FeedSink,
}

impl ChangeStream {
    async fn run(self, first: Response) {
        let table = self.table;
        let mut response = first;
        loop {
            match self.forward(response).await {
                StreamEnd::SinkClosed => return,
                StreamEnd::Dropped(reason) => tracing::error!(
                    %table,
                    %reason,
                    "change feed connection lost, reconnecting"
                ),
            }
            let mut delay = RECONNECT_MIN;
            response = loop {
                tokio::time::sleep(delay).await;
                if self.sink.is_closed() {
                    return;
                }
                match self.connect().await {
                    Ok(response) => break response,
                    Err(e) => {
                        tracing::warn!(%table, error = %format!("{e:#}"), "change feed reconnect failed");
                        delay = (delay * 2).min(RECONNECT_MAX);
                    }
                }
            };
            tracing::info!(%table, "change feed reconnected");
        }
    }

    async fn connect(&self) -> anyhow::Result<Response> {
        let response = self
            .client
            .get(&self.url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.url))?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("change feed refused: {status}");
        }
        Ok(response)
    }

    async fn forward(&self, response: Response) -> StreamEnd {
        let mut stream = response.bytes_stream();
        let mut decoder = EventStreamDecoder::default();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => return StreamEnd::Dropped(e.to_string()),
            };
            for event in decoder.push(&chunk) {
                match event {
                    Ok(event) => {
                        if self.sink.send(event).is_err() {
                            return StreamEnd::SinkClosed;
                        }
                    }
                    Err(e) => tracing::warn!(table = %self.table, error = %e, "unreadable change event"),
                }
            }
        }
        StreamEnd::Dropped("closed by server".to_string())
    }
}
