//! In-process HTTP proxy stub for tests.
//!
//! Answers absolute-form proxy requests (`GET http://host/path HTTP/1.1`) from a route
//! table and remembers every URL it was asked for. [`CapturedLogs`] collects formatted
//! log output for assertions.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;

use crate::proxy::ProxyEndpoint;

#[derive(Debug, Clone)]
struct Route {
    status: u16,
    body: String,
    delay: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Routes(HashMap<String, Route>);

impl Routes {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn ok(self, url: &str, body: &str) -> Self {
        self.insert(url, 200, body, None)
    }

    pub(crate) fn status(self, url: &str, status: u16) -> Self {
        self.insert(url, status, "", None)
    }

    /// 200 after `delay`.
    pub(crate) fn slow(self, url: &str, body: &str, delay: Duration) -> Self {
        self.insert(url, 200, body, Some(delay))
    }

    fn insert(mut self, url: &str, status: u16, body: &str, delay: Option<Duration>) -> Self {
        self.0.insert(
            url.to_string(),
            Route {
                status,
                body: body.to_string(),
                delay,
            },
        );
        self
    }
}

/// Request target and `User-Agent` header of one request.
type Served = (String, Option<String>);

pub(crate) struct StubProxy {
    addr: SocketAddr,
    served: Arc<Mutex<Vec<Served>>>,
    handle: JoinHandle<()>,
}

impl StubProxy {
    pub(crate) async fn start(routes: Routes) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let served = Arc::new(Mutex::new(Vec::new()));
        let routes = Arc::new(routes);

        let handle = tokio::spawn({
            let served = served.clone();
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let served = served.clone();
                    let routes = routes.clone();
                    tokio::spawn(async move { serve(stream, &routes, &served).await });
                }
            }
        });

        Self {
            addr,
            served,
            handle,
        }
    }

    pub(crate) fn endpoint(&self) -> ProxyEndpoint {
        ProxyEndpoint::new(&self.addr.to_string())
    }

    /// Every URL requested through this proxy, in arrival order.
    pub(crate) fn served(&self) -> Vec<String> {
        self.served.lock().unwrap().iter().map(|(url, _)| url.clone()).collect()
    }

    /// The `User-Agent` sent with each request, in arrival order.
    pub(crate) fn user_agents(&self) -> Vec<Option<String>> {
        self.served.lock().unwrap().iter().map(|(_, ua)| ua.clone()).collect()
    }
}

impl Drop for StubProxy {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// An endpoint nothing listens on.
pub(crate) fn refused_endpoint() -> ProxyEndpoint {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    ProxyEndpoint::new(&addr.to_string())
}

async fn serve(mut stream: TcpStream, routes: &Routes, served: &Mutex<Vec<Served>>) {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }

    let head = String::from_utf8_lossy(&buf);
    let Some(target) = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .map(str::to_string)
    else {
        return;
    };
    let user_agent = head.lines().skip(1).find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("user-agent")
            .then(|| value.trim().to_string())
    });
    served.lock().unwrap().push((target.clone(), user_agent));

    let route = routes.0.get(&target).cloned().unwrap_or(Route {
        status: 404,
        body: String::new(),
        delay: None,
    });
    if let Some(delay) = route.delay {
        tokio::time::sleep(delay).await;
    }

    let response = format!(
        "HTTP/1.1 {} STUB\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        route.status,
        route.body.len(),
        route.body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

/// Formatted log output of everything logged on the current thread while installed.
#[derive(Debug, Clone, Default)]
pub(crate) struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    /// Captures until the returned guard is dropped.
    pub(crate) fn install(&self) -> DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::TRACE)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
