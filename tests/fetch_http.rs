mod common;

use common::{http_response, png_bytes, serve_raw, serve_silent};
use imgpress::{
    config::Config,
    fetch::{FetchError, Fetcher, HttpFetcher},
};
use url::Url;

fn fetcher(max_payload_bytes: u64) -> HttpFetcher {
    let mut cfg = Config::default();
    cfg.fetch.max_payload_bytes = max_payload_bytes;
    cfg.fetch.connect_timeout_seconds = 1;
    cfg.fetch.read_timeout_seconds = 1;
    cfg.global.per_call_timeout_seconds = 2;
    HttpFetcher::new(&cfg).expect("build fetcher")
}

fn url_for(addr: std::net::SocketAddr, path: &str) -> Url {
    Url::parse(&format!("http://{addr}{path}")).unwrap()
}

#[tokio::test]
async fn fetches_body_and_content_type() {
    let body = png_bytes(8, 8);
    let addr = serve_raw(http_response("200 OK", "image/png", &body)).await;

    let payload = fetcher(1024 * 1024)
        .fetch(&url_for(addr, "/a.png"))
        .await
        .expect("fetch ok");

    assert_eq!(payload.content_type, "image/png");
    assert_eq!(payload.bytes.as_ref(), body.as_slice());
    assert_eq!(payload.size_bytes(), body.len() as u64);
}

#[tokio::test]
async fn non_success_status_is_reported_with_code() {
    let addr = serve_raw(http_response("404 Not Found", "text/plain", b"nope")).await;
    let err = fetcher(1024).fetch(&url_for(addr, "/missing.jpg")).await.unwrap_err();
    assert!(matches!(err, FetchError::HttpStatus { code: 404 }), "{err:?}");
}

#[tokio::test]
async fn declared_length_over_cap_fails_before_reading() {
    let body = vec![0u8; 4096];
    let addr = serve_raw(http_response("200 OK", "image/jpeg", &body)).await;
    let err = fetcher(1024).fetch(&url_for(addr, "/big.jpg")).await.unwrap_err();
    assert!(matches!(err, FetchError::PayloadTooLarge { limit: 1024 }), "{err:?}");
}

#[tokio::test]
async fn undeclared_body_over_cap_aborts_mid_stream() {
    let mut resp =
        b"HTTP/1.1 200 OK\r\nContent-Type: image/jpeg\r\nConnection: close\r\n\r\n".to_vec();
    resp.extend(std::iter::repeat_n(0xABu8, 64 * 1024));
    let addr = serve_raw(resp).await;

    let err = fetcher(1024).fetch(&url_for(addr, "/stream.jpg")).await.unwrap_err();
    assert!(matches!(err, FetchError::PayloadTooLarge { .. }), "{err:?}");
}

#[tokio::test]
async fn chunked_body_over_cap_aborts_mid_stream() {
    let mut resp =
        b"HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n"
            .to_vec();
    for _ in 0..8 {
        resp.extend_from_slice(b"200\r\n");
        resp.extend(std::iter::repeat_n(1u8, 512));
        resp.extend_from_slice(b"\r\n");
    }
    resp.extend_from_slice(b"0\r\n\r\n");
    let addr = serve_raw(resp).await;

    let err = fetcher(1024).fetch(&url_for(addr, "/chunked.png")).await.unwrap_err();
    assert!(matches!(err, FetchError::PayloadTooLarge { .. }), "{err:?}");
}

#[tokio::test]
async fn empty_body_is_an_error() {
    let addr = serve_raw(http_response("200 OK", "image/png", b"")).await;
    let err = fetcher(1024).fetch(&url_for(addr, "/empty.png")).await.unwrap_err();
    assert!(matches!(err, FetchError::EmptyBody), "{err:?}");
}

#[tokio::test]
async fn unresponsive_server_times_out() {
    let addr = serve_silent().await;
    let err = fetcher(1024).fetch(&url_for(addr, "/slow.jpg")).await.unwrap_err();
    assert!(matches!(err, FetchError::Timeout), "{err:?}");
}

#[tokio::test]
async fn refused_connection_is_connection_failed() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = fetcher(1024).fetch(&url_for(addr, "/gone.jpg")).await.unwrap_err();
    assert!(matches!(err, FetchError::ConnectionFailed { .. }), "{err:?}");
}
