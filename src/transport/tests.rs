use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, Version, header};
use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tower::ServiceExt;

use super::http::{AppState, MAX_FORM_BYTES, form_value, router, serve};
use crate::broker::{Broker, BrokerHandle};
use crate::config::Settings;

fn app() -> (Router, BrokerHandle) {
    let (broker, _hub) = Broker::new().spawn();
    let state = AppState::new(broker.clone(), &Settings::default().stream).unwrap();
    (router(state), broker)
}

fn get(path: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(path)
        .body(Body::empty())
        .unwrap()
}

fn post(path: &str, form: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form.to_string()))
        .unwrap()
}

async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

#[test]
fn test_form_value() {
    assert_eq!(form_value(b"msg=hello", None, "msg"), "hello");
    assert_eq!(form_value(b"msg=hello+world%21", None, "msg"), "hello world!");
    assert_eq!(form_value(b"other=1", None, "msg"), "");
    assert_eq!(form_value(b"", Some("msg=from-query"), "msg"), "from-query");
    assert_eq!(form_value(b"msg=body", Some("msg=query"), "msg"), "body");
    assert_eq!(form_value(b"\xff\xfe", None, "msg"), "");
}

#[tokio::test]
async fn test_publish_returns_no_content() {
    let (app, _broker) = app();
    let response = app
        .oneshot(post("/infocenter/weather", "msg=hello"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(response.headers().get(header::CONTENT_TYPE).is_none());
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_publish_with_missing_body_is_accepted() {
    let (app, broker) = app();
    let (client, mut rx) = crate::client::Client::channel();
    broker.register(client).unwrap();

    let response = app.oneshot(post("/infocenter/weather", "")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let message = rx.recv().await.unwrap();
    assert_eq!((message.id, message.body.as_str()), (1, ""));
}

#[tokio::test]
async fn test_publish_accepts_multipart_form() {
    let (app, broker) = app();
    let (client, mut rx) = crate::client::Client::channel();
    broker.register(client).unwrap();

    let form = "--XyZ\r\n\
                Content-Disposition: form-data; name=\"other\"\r\n\r\n\
                skip\r\n\
                --XyZ\r\n\
                Content-Disposition: form-data; name=\"msg\"\r\n\r\n\
                hello\r\n\
                --XyZ--\r\n";
    let request = Request::builder()
        .method(Method::POST)
        .uri("/infocenter/weather")
        .header(header::CONTENT_TYPE, "multipart/form-data; boundary=XyZ")
        .body(Body::from(form))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let message = rx.recv().await.unwrap();
    assert_eq!((message.id, message.body.as_str()), (1, "hello"));
}

#[tokio::test]
async fn test_broken_multipart_falls_back_to_query() {
    let (app, broker) = app();
    let (client, mut rx) = crate::client::Client::channel();
    broker.register(client).unwrap();

    let request = Request::builder()
        .method(Method::POST)
        .uri("/infocenter/weather?msg=from-query")
        .header(header::CONTENT_TYPE, "multipart/form-data; boundary=XyZ")
        .body(Body::from("not a multipart body"))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(rx.recv().await.unwrap().body, "from-query");
}

#[tokio::test]
async fn test_large_publish_is_accepted() {
    let (app, broker) = app();
    let (client, mut rx) = crate::client::Client::channel();
    broker.register(client).unwrap();

    // bigger than axum's default extractor limit
    let text = "a".repeat(3 * 1024 * 1024);
    let response = app
        .oneshot(post("/infocenter/weather", &format!("msg={text}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(rx.recv().await.unwrap().body.len(), text.len());
}

#[tokio::test]
async fn test_oversized_publish_becomes_empty_message() {
    let (app, broker) = app();
    let (client, mut rx) = crate::client::Client::channel();
    broker.register(client).unwrap();

    let text = "a".repeat(MAX_FORM_BYTES);
    let response = app
        .oneshot(post("/infocenter/weather", &format!("msg={text}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let message = rx.recv().await.unwrap();
    assert_eq!((message.id, message.body.as_str()), (1, ""));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_publishes_get_unique_increasing_ids() {
    const PUBLISHERS: u64 = 32;

    let (app, _broker) = app();
    let response = app.clone().oneshot(get("/infocenter/weather")).await.unwrap();
    let mut stream = response.into_body().into_data_stream();

    let mut publishers = tokio::task::JoinSet::new();
    for n in 0..PUBLISHERS {
        let app = app.clone();
        publishers.spawn(async move {
            app.oneshot(post("/infocenter/weather", &format!("msg=p{n}")))
                .await
                .unwrap()
                .status()
        });
    }
    while let Some(status) = publishers.join_next().await {
        assert_eq!(status.unwrap(), StatusCode::NO_CONTENT);
    }

    let mut ids = Vec::new();
    for _ in 0..PUBLISHERS {
        let frame = stream.next().await.unwrap().unwrap();
        let frame = String::from_utf8(frame.to_vec()).unwrap();
        let id = frame
            .strip_prefix("id: ")
            .and_then(|rest| rest.split('\n').next())
            .and_then(|id| id.parse::<u64>().ok())
            .unwrap_or_else(|| panic!("unexpected frame {frame:?}"));
        ids.push(id);
    }

    // delivered in increasing order, each id exactly once
    assert_eq!(ids, (1..=PUBLISHERS).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_subscribe_sets_stream_headers() {
    let (app, _broker) = app();
    let response = app.oneshot(get("/infocenter/weather")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
    assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
    assert_eq!(headers[header::CONNECTION], "keep-alive");
    assert_eq!(headers[header::TRANSFER_ENCODING], "chunked");
}

#[tokio::test]
async fn test_published_message_reaches_open_stream() {
    let (app, _broker) = app();
    let response = app.clone().oneshot(get("/infocenter/weather")).await.unwrap();
    let mut stream = response.into_body().into_data_stream();

    let published = app
        .oneshot(post("/infocenter/weather", "msg=hello"))
        .await
        .unwrap();
    assert_eq!(published.status(), StatusCode::NO_CONTENT);

    let frame = stream.next().await.unwrap().unwrap();
    assert_eq!(&frame[..], b"id: 1\nevent: msg\ndata: hello\n\n");
}

#[tokio::test]
async fn test_streams_only_receive_their_topic() {
    let (app, _broker) = app();
    let weather = app.clone().oneshot(get("/infocenter/weather")).await.unwrap();
    let news = app.clone().oneshot(get("/infocenter/news")).await.unwrap();
    let mut weather = weather.into_body().into_data_stream();
    let mut news = news.into_body().into_data_stream();

    app.clone()
        .oneshot(post("/infocenter/weather", "msg=sunny"))
        .await
        .unwrap();

    let frame = weather.next().await.unwrap().unwrap();
    assert_eq!(&frame[..], b"id: 1\nevent: msg\ndata: sunny\n\n");

    // news only ever sees its own message, which comes second
    app.oneshot(post("/infocenter/news", "msg=headline"))
        .await
        .unwrap();
    let frame = news.next().await.unwrap().unwrap();
    assert_eq!(&frame[..], b"id: 2\nevent: msg\ndata: headline\n\n");
}

#[tokio::test]
async fn test_ids_follow_acceptance_order() {
    let (app, _broker) = app();
    let response = app.clone().oneshot(get("/infocenter/weather")).await.unwrap();
    let mut stream = response.into_body().into_data_stream();

    for n in 1..=5 {
        app.clone()
            .oneshot(post("/infocenter/weather", &format!("msg=m{n}")))
            .await
            .unwrap();
    }

    for n in 1..=5 {
        let frame = stream.next().await.unwrap().unwrap();
        let expected = format!("id: {n}\nevent: msg\ndata: m{n}\n\n");
        assert_eq!(&frame[..], expected.as_bytes());
    }
}

#[tokio::test(start_paused = true)]
async fn test_idle_stream_times_out() {
    let (app, broker) = app();
    let response = app.oneshot(get("/infocenter/news")).await.unwrap();

    // the body ends once the session has written its timeout frame
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"event: timeout\ndata 30s\n\n");

    settle().await;
    assert_eq!(broker.connected_clients(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_payload_follows_configuration() {
    let (broker, _hub) = Broker::new().spawn();
    let mut settings = Settings::default();
    settings.stream.max_connection_secs = 5;
    let app = router(AppState::new(broker, &settings.stream).unwrap());

    let started = tokio::time::Instant::now();
    let response = app.oneshot(get("/infocenter/news")).await.unwrap();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();

    assert_eq!(&body[..], b"event: timeout\ndata 5s\n\n");
    assert!(started.elapsed() >= Duration::from_secs(5));
}

#[tokio::test]
async fn test_dropping_stream_deregisters_subscriber() {
    let (app, broker) = app();
    let response = app.oneshot(get("/infocenter/weather")).await.unwrap();
    settle().await;
    assert_eq!(broker.connected_clients(), 1);

    drop(response);
    settle().await;
    assert_eq!(broker.connected_clients(), 0);
}

#[tokio::test]
async fn test_unresolvable_topic_is_ignored() {
    let (app, broker) = app();
    for path in ["/infocenter/", "/infocenter/Weather", "/infocenter/a/b"] {
        let response = app.clone().oneshot(get(path)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{path}");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
    }
    settle().await;
    assert_eq!(broker.connected_clients(), 0);
}

#[tokio::test]
async fn test_other_prefix_is_not_found() {
    let (app, _broker) = app();
    let response = app.oneshot(get("/elsewhere/weather")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_http10_cannot_stream() {
    let (app, broker) = app();
    let request = Request::builder()
        .method(Method::GET)
        .uri("/infocenter/weather")
        .version(Version::HTTP_10)
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"Streaming unsupported!");

    settle().await;
    assert_eq!(broker.connected_clients(), 0);
}

#[tokio::test]
async fn test_other_methods_are_ignored() {
    let (app, _broker) = app();
    let request = Request::builder()
        .method(Method::PUT)
        .uri("/infocenter/weather")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_broker_down_is_reported() {
    let (broker, hub) = Broker::new().spawn();
    let app = router(AppState::new(broker, &Settings::default().stream).unwrap());
    hub.abort();
    let _ = hub.await;

    let response = app
        .clone()
        .oneshot(post("/infocenter/weather", "msg=hello"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let response = app.oneshot(get("/infocenter/weather")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_end_to_end_over_tcp() {
    let (broker, _hub) = Broker::new().spawn();
    let state = AppState::new(broker.clone(), &Settings::default().stream).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, state));

    let mut subscriber = TcpStream::connect(addr).await.unwrap();
    subscriber
        .write_all(b"GET /infocenter/weather HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();

    // wait for the subscription before publishing
    while broker.connected_clients() == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let mut publisher = TcpStream::connect(addr).await.unwrap();
    let form = "msg=hello";
    let request = format!(
        "POST /infocenter/weather HTTP/1.1\r\nHost: localhost\r\n\
         Content-Type: application/x-www-form-urlencoded\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{form}",
        form.len()
    );
    publisher.write_all(request.as_bytes()).await.unwrap();
    let mut reply = String::new();
    publisher.read_to_string(&mut reply).await.unwrap();
    assert!(reply.starts_with("HTTP/1.1 204"), "{reply}");

    let mut received = Vec::new();
    let mut buf = [0u8; 1024];
    let frame = "id: 1\nevent: msg\ndata: hello\n\n";
    while !String::from_utf8_lossy(&received).contains(frame) {
        let n = tokio::time::timeout(Duration::from_secs(5), subscriber.read(&mut buf))
            .await
            .expect("frame should arrive")
            .unwrap();
        assert!(n > 0, "stream closed early");
        received.extend_from_slice(&buf[..n]);
    }

    let head = String::from_utf8_lossy(&received).to_lowercase();
    assert!(head.starts_with("http/1.1 200"));
    assert!(head.contains("content-type: text/event-stream"));
    assert!(head.contains("transfer-encoding: chunked"));
}

#[tokio::test]
async fn test_formatter_can_be_swapped() {
    use crate::event::{EventFormatter, SseEvent};
    use std::sync::Arc;

    struct Bare;
    impl EventFormatter for Bare {
        fn format(&self, event: &SseEvent) -> String {
            match event {
                SseEvent::Standard { id, data, .. } => format!("{id}:{data}\n"),
                SseEvent::TimedOut { data, .. } => format!("bye {data}\n"),
            }
        }
    }

    let (broker, _hub) = Broker::new().spawn();
    let state = AppState::new(broker, &Settings::default().stream)
        .unwrap()
        .with_formatter(Arc::new(Bare));
    let app = router(state);

    let response = app.clone().oneshot(get("/infocenter/weather")).await.unwrap();
    let mut stream = response.into_body().into_data_stream();
    app.oneshot(post("/infocenter/weather", "msg=hi")).await.unwrap();

    let frame = stream.next().await.unwrap().unwrap();
    assert_eq!(&frame[..], b"1:hi\n");
}
