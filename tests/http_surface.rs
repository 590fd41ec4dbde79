use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use quarry::engine::Engine;
use quarry::server;
use quarry::world::World;

async fn serve(row_limit: usize) -> std::net::SocketAddr {
    let engine = Engine::new(World::new());
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = server::router(engine, row_limit);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

async fn post(addr: std::net::SocketAddr, path: &str, body: Value) -> (u16, Value) {
    let body = body.to_string();
    let request = format!(
        "POST {path} HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    stream.write_all(request.as_bytes()).await.expect("write");
    let mut response = String::new();
    stream.read_to_string(&mut response).await.expect("read");
    let (head, payload) = response.split_once("\r\n\r\n").expect("http response");
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .expect("status code");
    (status, serde_json::from_str(payload).expect("json body"))
}

#[tokio::test]
async fn facts_then_query_over_http() {
    let addr = serve(100).await;
    let (status, body) = post(addr, "/v1/facts", json!({ "facts": "IsA(Dog, Animal), IsA(Cat, Animal), Sentient(Animal)" })).await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["changed"], 3);

    let (status, body) = post(addr, "/v1/query", json!({ "terms": "Sentient(X), IsA(Y, X)" })).await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["columns"], json!(["X", "Y"]));
    assert_eq!(body["rows"], json!([["Animal", "Dog"], ["Animal", "Cat"]]));
    assert_eq!(body["limited"], false);
}

#[tokio::test]
async fn server_row_limit_caps_requests() {
    let addr = serve(1).await;
    post(addr, "/v1/facts", json!({ "facts": "Planet(Earth), Planet(Mars)" })).await;
    let (status, body) = post(addr, "/v1/query", json!({ "terms": "Planet(X)", "limit": 10 })).await;
    assert_eq!(status, 200);
    assert_eq!(body["row_count"], 1, "the server limit wins over a larger request");
    assert_eq!(body["limited"], true);
}

#[tokio::test]
async fn compile_errors_are_bad_requests() {
    let addr = serve(100).await;
    let (status, body) = post(addr, "/v1/query", json!({ "terms": "Unknown(X)" })).await;
    assert_eq!(status, 400);
    assert_eq!(body["status"], "error");
    assert!(body["error"].as_str().is_some_and(|e| e.contains("Unknown")), "{body}");
}

#[tokio::test]
async fn cycles_are_conflicts() {
    let addr = serve(100).await;
    post(addr, "/v1/facts", json!({ "facts": "ChildOf(Leaf, Branch)" })).await;
    let (status, _) = post(addr, "/v1/facts", json!({ "facts": "ChildOf(Branch, Leaf)" })).await;
    assert_eq!(status, 409);
    let (status, body) = post(addr, "/v1/facts", json!({ "facts": "ChildOf(Leaf, Branch)", "retract": true })).await;
    assert_eq!(status, 200);
    assert_eq!(body["changed"], 1);
}
