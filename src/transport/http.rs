//! HTTP transport
//!
//! Every request under `/<service>/` goes through one dispatcher, which:
//! - resolves the topic from the path; requests without a valid topic get an
//!   empty `200` and are otherwise ignored
//! - refuses HTTP/1.0 and older with `500`, since they cannot carry a
//!   chunked event stream
//! - hands `GET` to a new [`Session`] and `POST` to the broker
//!
//! Each session runs on its own task and feeds the response body through a
//! bounded frame queue. When the client goes away the body is dropped, the
//! queue closes, and the session ends and deregisters.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use axum::Router;
use axum::body::{Body, Bytes, to_bytes};
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Method, StatusCode, Version, header};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use url::form_urlencoded;

use crate::broker::{BrokerHandle, TopicResolver};
use crate::client::Session;
use crate::config::{Settings, StreamSettings};
use crate::event::{EventFormatter, PlainTextFormatter};
use crate::utils::error::{InfocenterError, Result};

/// Form field carrying the published text.
pub const MESSAGE_FIELD: &str = "msg";

/// Largest publish body that is read. Anything bigger is published as an
/// empty message, the same as any other unreadable form.
pub const MAX_FORM_BYTES: usize = 10 * 1024 * 1024;

/// Shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub broker: BrokerHandle,
    pub resolver: Arc<TopicResolver>,
    pub formatter: Arc<dyn EventFormatter>,
    pub stream: StreamSettings,
}

impl AppState {
    pub fn new(broker: BrokerHandle, stream: &StreamSettings) -> Result<Self> {
        Ok(Self {
            broker,
            resolver: Arc::new(TopicResolver::new(&stream.service_name)?),
            formatter: Arc::new(PlainTextFormatter),
            stream: stream.clone(),
        })
    }

    pub fn with_formatter(mut self, formatter: Arc<dyn EventFormatter>) -> Self {
        self.formatter = formatter;
        self
    }

    fn max_connection(&self) -> Duration {
        Duration::from_secs(self.stream.max_connection_secs)
    }
}

pub fn router(state: AppState) -> Router {
    let prefix = format!("/{}", state.resolver.service_name());
    Router::new()
        .route(&format!("{prefix}/"), any(dispatch))
        .route(&format!("{prefix}/{{*path}}"), any(dispatch))
        .layer(DefaultBodyLimit::max(MAX_FORM_BYTES))
        .with_state(state)
}

/// Serves the router on an already bound listener until it fails.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    axum::serve(listener, router(state))
        .await
        .map_err(InfocenterError::Serve)
}

pub async fn start_http_server(settings: &Settings, broker: BrokerHandle) -> Result<()> {
    settings.validate()?;
    let state = AppState::new(broker, &settings.stream)?;

    let addr = settings.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| InfocenterError::Bind {
            addr: addr.clone(),
            source,
        })?;

    info!(
        "Infocenter listening on http://{addr}/{}/<topic>",
        settings.stream.service_name
    );
    serve(listener, state).await
}

async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let Some(topic) = state.resolver.resolve(parts.uri.path()) else {
        warn!(path = %parts.uri.path(), "Error parsing topic from request URI");
        return StatusCode::OK.into_response();
    };

    if matches!(parts.version, Version::HTTP_09 | Version::HTTP_10) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Streaming unsupported!").into_response();
    }

    let method = parts.method.clone();
    match method {
        Method::GET => subscribe(&state, topic),
        Method::POST => {
            let msg = read_message(parts, body).await;
            publish(&state, topic, msg)
        }
        other => {
            debug!(method = %other, topic = %topic, "Ignoring request");
            StatusCode::OK.into_response()
        }
    }
}

fn subscribe(state: &AppState, topic: String) -> Response {
    let (frames, mut outgoing) = mpsc::channel::<String>(state.stream.frame_buffer.max(1));

    let session = match Session::open(
        state.broker.clone(),
        topic,
        state.max_connection(),
        Arc::clone(&state.formatter),
        frames,
    ) {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to open session: {e}");
            return (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response();
        }
    };

    info!(
        client = %session.id(),
        topic = %session.subscription().topic,
        "Subscriber connected"
    );
    tokio::spawn(session.run());

    let body = stream! {
        while let Some(frame) = outgoing.recv().await {
            yield Ok::<_, Infallible>(frame);
        }
    };

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
            (header::TRANSFER_ENCODING, "chunked"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

fn publish(state: &AppState, topic: String, msg: String) -> Response {
    info!(topic = %topic, msg = %msg, "Message received");

    match state.broker.publish(topic, msg) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            error!("Failed to publish message: {e}");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

/// Extracts the published text from a url-encoded or multipart form.
///
/// Like the form lookup it replaces, this never fails: a body that is too
/// large or cannot be parsed yields an empty message. The query string is
/// the fallback in both cases.
async fn read_message(parts: Parts, body: Body) -> String {
    let bytes = match to_bytes(body, MAX_FORM_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to read form body: {e}");
            Bytes::new()
        }
    };
    let query = parts.uri.query().map(str::to_owned);

    if is_multipart(&parts.headers) && !bytes.is_empty() {
        let request = Request::from_parts(parts, Body::from(bytes));
        if let Some(value) = multipart_value(request, MESSAGE_FIELD).await {
            return value;
        }
        return form_value(b"", query.as_deref(), MESSAGE_FIELD);
    }

    form_value(&bytes, query.as_deref(), MESSAGE_FIELD)
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"))
}

/// First non-file part named `key`.
async fn multipart_value(request: Request, key: &str) -> Option<String> {
    let mut multipart = match Multipart::from_request(request, &()).await {
        Ok(multipart) => multipart,
        Err(e) => {
            warn!("Failed to parse multipart form: {e}");
            return None;
        }
    };

    loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some(key) && field.file_name().is_none() => {
                return field.text().await.ok();
            }
            Ok(Some(_)) => continue,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read multipart field: {e}");
                return None;
            }
        }
    }
}

/// Looks `key` up in a url-encoded body, then in the query string.
///
/// Missing or unparseable input yields an empty string.
pub(crate) fn form_value(body: &[u8], query: Option<&str>, key: &str) -> String {
    form_urlencoded::parse(body)
        .chain(form_urlencoded::parse(query.unwrap_or_default().as_bytes()))
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.into_owned())
        .unwrap_or_default()
}
