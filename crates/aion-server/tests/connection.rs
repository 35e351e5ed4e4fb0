//! Tests that need a real socket: client disconnects and graceful shutdown.

mod support;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use aion_server::{AppState, LifecycleHooks, serve};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use support::{TickerFactory, state_with};

struct Running {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<anyhow::Result<()>>,
}

async fn start(state: AppState, hooks: LifecycleHooks) -> Running {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown, signal) = oneshot::channel::<()>();
    let handle = tokio::spawn(serve(listener, state, hooks, async move {
        let _ = signal.await;
    }));
    Running {
        addr,
        shutdown,
        handle,
    }
}

async fn open_stream(addr: SocketAddr, message: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let body = json!({ "message": message }).to_string();
    let request = format!(
        "POST /api/v1/chat HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    stream
}

/// Read until `needle` shows up in the accumulated response.
async fn read_until(stream: &mut TcpStream, needle: &str) -> String {
    let mut seen = Vec::new();
    let mut buf = [0u8; 1024];
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed before {needle:?}");
            seen.extend_from_slice(&buf[..n]);
            if String::from_utf8_lossy(&seen).contains(needle) {
                break;
            }
        }
    })
    .await
    .expect("timed out waiting for stream data");
    String::from_utf8_lossy(&seen).into_owned()
}

async fn read_to_end(stream: &mut TcpStream) -> String {
    let mut rest = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut rest))
        .await
        .expect("timed out waiting for connection close")
        .unwrap();
    String::from_utf8_lossy(&rest).into_owned()
}

#[tokio::test]
async fn client_disconnect_stops_production() {
    let factory = TickerFactory::new(Duration::from_millis(10));
    let produced = factory.produced.clone();
    let server = start(state_with(factory), LifecycleHooks::new()).await;

    let mut stream = open_stream(server.addr, "anything").await;
    let head = read_until(&mut stream, "tick2").await;
    assert!(head.contains("text/event-stream"));
    drop(stream);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let after_disconnect = produced.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(produced.load(Ordering::SeqCst), after_disconnect);

    let _ = server.shutdown.send(());
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_cancels_active_streams() {
    let stopped = Arc::new(AtomicBool::new(false));
    let flag = stopped.clone();
    let hooks = LifecycleHooks::new().on_stop(move |_| flag.store(true, Ordering::SeqCst));

    let factory = TickerFactory::new(Duration::from_millis(10));
    let server = start(state_with(factory), hooks).await;

    let mut stream = open_stream(server.addr, "anything").await;
    read_until(&mut stream, "tick1").await;

    server.shutdown.send(()).unwrap();
    let rest = read_to_end(&mut stream).await;
    assert!(rest.contains("data: [ERROR: Stream cancelled]"), "{rest}");
    assert!(!rest.contains("[DONE]"));

    tokio::time::timeout(Duration::from_secs(5), server.handle)
        .await
        .expect("server did not drain")
        .unwrap()
        .unwrap();
    assert!(stopped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn completed_stream_over_socket() {
    let server = start(support::fast_state(), LifecycleHooks::new()).await;
    let mut stream = open_stream(server.addr, "hello world").await;
    let response = read_to_end(&mut stream).await;
    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.contains("data: hello \n\n"));
    assert!(response.contains("data: world \n\n"));
    assert!(response.contains("data: [DONE]\n\n"));

    let _ = server.shutdown.send(());
    server.handle.await.unwrap().unwrap();
}
