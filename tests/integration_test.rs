//! Integration tests for TlsProxy
//!
//! Runs the HTTPS proxy with a self-signed certificate in front of wiremock upstreams and checks:
//! - Forwarding onto the upstream base URL
//! - Forwarding headers and host override
//! - Prefix mappings
//! - Upstream failures

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tlsproxy::{
    generate_self_signed, parse_mappings, CertificateMaterial, ProxyConfig, ProxyServer,
    ReverseProxyRouter, ServerSettings,
};
use tokio::net::TcpListener;
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn certificate() -> &'static CertificateMaterial {
    static CERTIFICATE: OnceLock<CertificateMaterial> = OnceLock::new();
    CERTIFICATE.get_or_init(|| generate_self_signed(&["localhost", "127.0.0.1"]).unwrap())
}

/// Start a proxy on an ephemeral port and return its address
async fn start_proxy(config: ProxyConfig) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let settings = ServerSettings {
        listen_addr: addr,
        ..ServerSettings::default()
    };
    let server = Arc::new(
        ProxyServer::new(settings, ReverseProxyRouter::new(config), certificate()).unwrap(),
    );

    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });

    addr
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .no_proxy()
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_proxy_simple_request() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/foo"))
        .and(query_param("p", "v"))
        .respond_with(ResponseTemplate::new(200).set_body_string("BACKEND_RESPONSE"))
        .expect(1)
        .mount(&upstream)
        .await;

    let proxy = start_proxy(ProxyConfig::new(&upstream.uri()).unwrap()).await;

    let response = client()
        .get(format!("https://{}/foo?p=v", proxy))
        .send()
        .await
        .unwrap();

    assert!(response.status().is_success());
    assert_eq!(response.text().await.unwrap(), "BACKEND_RESPONSE");
}

#[tokio::test]
async fn test_forwarding_headers() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/headers"))
        .and(header("x-forwarded-proto", "https"))
        .and(header("x-forwarded-for", "127.0.0.1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .expect(1)
        .mount(&upstream)
        .await;

    let proxy = start_proxy(ProxyConfig::new(&upstream.uri()).unwrap()).await;

    // a spoofed protocol header from the client is replaced
    let response = client()
        .get(format!("https://{}/headers", proxy))
        .header("X-Forwarded-Proto", "gopher")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_host_header_passthrough() {
    let upstream = MockServer::start().await;
    Mock::given(path("/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&upstream)
        .await;

    let proxy = start_proxy(ProxyConfig::new(&upstream.uri()).unwrap()).await;
    let response = client()
        .get(format!("https://{}/", proxy))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // without an override the upstream sees the host the client addressed
    let requests = upstream.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].headers["host"], proxy.to_string().as_str());
}

#[tokio::test]
async fn test_host_override() {
    let upstream = MockServer::start().await;
    Mock::given(path("/vhost"))
        .and(header("host", "backend.internal"))
        .respond_with(ResponseTemplate::new(200).set_body_string("VHOST"))
        .expect(1)
        .mount(&upstream)
        .await;

    let config = ProxyConfig::new(&upstream.uri())
        .unwrap()
        .with_host_override("backend.internal")
        .unwrap();
    let proxy = start_proxy(config).await;

    let response = client()
        .get(format!("https://{}/vhost", proxy))
        .send()
        .await
        .unwrap();

    assert_eq!(response.text().await.unwrap(), "VHOST");
}

#[tokio::test]
async fn test_client_headers_passthrough() {
    let upstream = MockServer::start().await;
    Mock::given(path("/page"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&upstream)
        .await;

    let proxy = start_proxy(ProxyConfig::new(&upstream.uri()).unwrap()).await;
    let response = client()
        .get(format!("https://{}/page", proxy))
        .header("accept", "text/html")
        .header("x-request-id", "abc-123")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let requests = upstream.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let accept: Vec<_> = requests[0].headers.get_all("accept").iter().collect();
    assert_eq!(accept, ["text/html"]);
    assert_eq!(requests[0].headers["x-request-id"], "abc-123");
}

#[tokio::test]
async fn test_upstream_base_path() {
    let upstream = MockServer::start().await;
    Mock::given(path("/api/v1/users"))
        .and(query_param("key", "abc"))
        .and(query_param("id", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("USERS"))
        .expect(1)
        .mount(&upstream)
        .await;

    let config = ProxyConfig::new(&format!("{}/api/v1/?key=abc", upstream.uri())).unwrap();
    let proxy = start_proxy(config).await;

    let response = client()
        .get(format!("https://{}/users?id=1", proxy))
        .send()
        .await
        .unwrap();

    assert_eq!(response.text().await.unwrap(), "USERS");
}

#[tokio::test]
async fn test_prefix_mapping() {
    let upstream = MockServer::start().await;
    let images = MockServer::start().await;

    Mock::given(path("/foo"))
        .respond_with(ResponseTemplate::new(200).set_body_string("MAIN"))
        .mount(&upstream)
        .await;
    Mock::given(path("/img/a.png"))
        .respond_with(ResponseTemplate::new(200).set_body_string("IMAGE"))
        .expect(1)
        .mount(&images)
        .await;

    let mappings = parse_mappings(&format!("/img/ {}", images.uri())).unwrap();
    let config = ProxyConfig::new(&upstream.uri())
        .unwrap()
        .with_mappings(mappings);
    let proxy = start_proxy(config).await;
    let client = client();

    let response = client
        .get(format!("https://{}/img/a.png", proxy))
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "IMAGE");

    let response = client
        .get(format!("https://{}/foo", proxy))
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "MAIN");
}

#[tokio::test]
async fn test_prefix_mapping_encoded_path() {
    let upstream = MockServer::start().await;
    let images = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("IMAGE"))
        .expect(1)
        .mount(&images)
        .await;

    let mappings = parse_mappings(&format!("/img/ {}", images.uri())).unwrap();
    let config = ProxyConfig::new(&upstream.uri())
        .unwrap()
        .with_mappings(mappings);
    let proxy = start_proxy(config).await;

    // the escaped path still selects the mapping
    let response = client()
        .get(format!("https://{}/im%67/a.png", proxy))
        .send()
        .await
        .unwrap();

    assert_eq!(response.text().await.unwrap(), "IMAGE");
    assert!(upstream.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_first_mapping_wins() {
    let upstream = MockServer::start().await;
    let short = MockServer::start().await;
    let long = MockServer::start().await;

    Mock::given(path("/api/v1/users"))
        .respond_with(ResponseTemplate::new(200).set_body_string("SHORT_MATCH"))
        .mount(&short)
        .await;
    Mock::given(path("/api/v1/users"))
        .respond_with(ResponseTemplate::new(200).set_body_string("LONG_MATCH"))
        .expect(0)
        .mount(&long)
        .await;

    let mappings =
        parse_mappings(&format!("/api/ {} /api/v1/ {}", short.uri(), long.uri())).unwrap();
    let config = ProxyConfig::new(&upstream.uri())
        .unwrap()
        .with_mappings(mappings);
    let proxy = start_proxy(config).await;

    let response = client()
        .get(format!("https://{}/api/v1/users", proxy))
        .send()
        .await
        .unwrap();

    assert_eq!(response.text().await.unwrap(), "SHORT_MATCH");
}

#[tokio::test]
async fn test_post_body_and_response_passthrough() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/submit"))
        .and(body_string("hello upstream"))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("x-upstream", "yes")
                .set_body_string("CREATED"),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let proxy = start_proxy(ProxyConfig::new(&upstream.uri()).unwrap()).await;

    let response = client()
        .post(format!("https://{}/submit", proxy))
        .body("hello upstream")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 201);
    assert_eq!(response.headers()["x-upstream"], "yes");
    assert_eq!(response.text().await.unwrap(), "CREATED");
}

#[tokio::test]
async fn test_upstream_unreachable() {
    // reserve a port, then free it so nothing listens there
    let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = unused.local_addr().unwrap();
    drop(unused);

    let config = ProxyConfig::new(&format!("http://{}/", dead_addr)).unwrap();
    let proxy = start_proxy(config).await;

    let response = client()
        .get(format!("https://{}/anything", proxy))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 502);
    assert_eq!(response.text().await.unwrap(), "Bad Gateway");
}
