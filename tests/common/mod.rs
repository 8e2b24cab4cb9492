//! Shared utilities for integration tests.
//!
//! Mock backends speak just enough HTTP/1.1 for reqwest: read the request
//! head, answer once, close the connection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Start a load-balanced pool behind one address.
///
/// Requests carrying an `lb=<name>` cookie for a pool member stick to it;
/// all others are spread round-robin. Every response names its backend in
/// `X-Server` and pins the client with `Set-Cookie: lb=<name>`.
#[allow(dead_code)]
pub async fn start_backend_pool(names: &[&str]) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let names: Arc<Vec<String>> = Arc::new(names.iter().map(|n| n.to_string()).collect());
    let next = Arc::new(AtomicUsize::new(0));

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let names = names.clone();
                    let next = next.clone();
                    tokio::spawn(async move {
                        let head = read_head(&mut socket).await;
                        let name = sticky_backend(&head, &names)
                            .unwrap_or_else(|| names[next.fetch_add(1, Ordering::SeqCst) % names.len()].clone());

                        let body = format!("served by {name}");
                        let response = format!(
                            "HTTP/1.1 200 OK\r\nX-Server: {name}\r\nSet-Cookie: lb={name}; Path=/\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                            body.len()
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Start a backend that never names itself.
#[allow(dead_code)]
pub async fn start_headerless_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        read_head(&mut socket).await;
                        let response = "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok";
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// An address nothing listens on.
#[allow(dead_code)]
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

async fn read_head(socket: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") && head.len() < 16 * 1024 {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    String::from_utf8_lossy(&head).into_owned()
}

fn sticky_backend(head: &str, names: &[String]) -> Option<String> {
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .filter(|(name, _)| name.trim().eq_ignore_ascii_case("cookie"))
        .flat_map(|(_, value)| value.split(';'))
        .filter_map(|pair| pair.trim().strip_prefix("lb="))
        .find(|value| names.iter().any(|n| n == value))
        .map(str::to_string)
}
