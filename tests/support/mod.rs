//! Minimal HTTP/1.1 fixture server for engine tests.
//!
//! Speaks just enough of the protocol to exercise the client: keep-alive,
//! HEAD, Range requests, plain and chunked framing.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

#[derive(Debug, Clone, Default)]
pub struct Route {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
    pub headers: Vec<(String, String)>,
    /// Serve the body chunked with these chunk sizes plus a trailer line.
    pub chunk_sizes: Option<Vec<usize>>,
    /// Honor `Range: bytes=a-b` with a 206 slice.
    pub ranged: bool,
    /// Demand an `Authorization` header, else 401 with a Basic challenge.
    pub auth_realm: Option<String>,
}

impl Route {
    pub fn ok(content_type: &str, body: impl Into<Vec<u8>>) -> Route {
        Route {
            status: 200,
            content_type: content_type.to_owned(),
            body: body.into(),
            ..Route::default()
        }
    }

    pub fn html(body: &str) -> Route {
        Route::ok("text/html", body.as_bytes().to_vec())
    }

    pub fn redirect(location: &str) -> Route {
        Route {
            status: 302,
            content_type: "text/html".to_owned(),
            body: b"moved".to_vec(),
            headers: vec![("Location".to_owned(), location.to_owned())],
            ..Route::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Route {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }
}

pub struct TestServer {
    pub port: u16,
    hits: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", self.port)
    }

    /// `"METHOD /path"` for every request, in arrival order.
    pub fn hits(&self) -> Vec<String> {
        self.hits.lock().unwrap().clone()
    }

    pub fn hit_count(&self, needle: &str) -> usize {
        self.hits().iter().filter(|hit| hit.as_str() == needle).count()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

pub fn serve(routes: HashMap<String, Route>) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let hits = Arc::new(Mutex::new(Vec::new()));
    let connections = Arc::new(AtomicUsize::new(0));

    let routes = Arc::new(routes);
    {
        let hits = Arc::clone(&hits);
        let connections = Arc::clone(&connections);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                connections.fetch_add(1, Ordering::SeqCst);
                let routes = Arc::clone(&routes);
                let hits = Arc::clone(&hits);
                thread::spawn(move || handle_connection(stream, &routes, &hits));
            }
        });
    }

    TestServer { port, hits, connections }
}

fn handle_connection(
    mut stream: TcpStream,
    routes: &HashMap<String, Route>,
    hits: &Mutex<Vec<String>>,
) {
    let mut buf = Vec::new();
    loop {
        // read one request head
        let head_end = loop {
            if let Some(at) = find(&buf, b"\r\n\r\n") {
                break at + 4;
            }
            let mut chunk = [0u8; 4096];
            match stream.read(&mut chunk) {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        };
        let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
        buf.drain(..head_end);

        let mut lines = head.lines();
        let request_line = lines.next().unwrap_or_default();
        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or_default().to_owned();
        let path = parts.next().unwrap_or_default().to_owned();

        let mut range = None;
        let mut authorized = false;
        for line in lines {
            if let Some(value) = line.strip_prefix("Range: bytes=") {
                if let Some((from, to)) = value.split_once('-') {
                    let from: u64 = from.trim().parse().unwrap_or(0);
                    let to: Option<u64> = to.trim().parse().ok();
                    range = Some((from, to));
                }
            }
            if line.starts_with("Authorization:") {
                authorized = true;
            }
        }

        hits.lock().unwrap().push(format!("{method} {path}"));

        let response = match routes.get(&path) {
            Some(route) => match &route.auth_realm {
                Some(realm) if !authorized => render_401(realm),
                _ => render(route, &method, range),
            },
            None => render_404(),
        };
        if stream.write_all(&response).is_err() {
            return;
        }
    }
}

fn render(route: &Route, method: &str, range: Option<(u64, Option<u64>)>) -> Vec<u8> {
    let mut status = route.status;
    let mut body = route.body.clone();

    if route.ranged {
        if let Some((from, to)) = range {
            let from = from as usize;
            let to = to.map(|t| t as usize + 1).unwrap_or(body.len()).min(body.len());
            if from <= to {
                body = body[from..to].to_vec();
                status = 206;
            }
        }
    }

    let mut head = format!("HTTP/1.1 {status} {}\r\n", reason(status));
    head.push_str(&format!("Content-Type: {}\r\n", route.content_type));
    head.push_str("Connection: keep-alive\r\n");
    for (name, value) in &route.headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }

    let mut wire = Vec::new();
    match (&route.chunk_sizes, method) {
        (_, "HEAD") => {
            head.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
            wire.extend_from_slice(head.as_bytes());
        }
        (Some(sizes), _) => {
            head.push_str("Transfer-Encoding: chunked\r\n\r\n");
            wire.extend_from_slice(head.as_bytes());
            let mut offset = 0;
            for &size in sizes {
                let end = (offset + size).min(body.len());
                wire.extend_from_slice(format!("{:x}\r\n", end - offset).as_bytes());
                wire.extend_from_slice(&body[offset..end]);
                wire.extend_from_slice(b"\r\n");
                offset = end;
            }
            wire.extend_from_slice(b"0\r\nX-Trailer: done\r\n\r\n");
        }
        (None, _) => {
            head.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
            wire.extend_from_slice(head.as_bytes());
            wire.extend_from_slice(&body);
        }
    }
    wire
}

fn render_401(realm: &str) -> Vec<u8> {
    let body = b"auth required";
    let mut wire = format!(
        "HTTP/1.1 401 Unauthorized\r\nContent-Type: text/plain\r\nConnection: keep-alive\r\n\
         WWW-Authenticate: Basic realm=\"{realm}\"\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    wire.extend_from_slice(body);
    wire
}

fn render_404() -> Vec<u8> {
    let body = b"not found";
    let mut wire = format!(
        "HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\nConnection: keep-alive\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    wire.extend_from_slice(body);
    wire
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        206 => "Partial Content",
        302 => "Found",
        304 => "Not Modified",
        401 => "Unauthorized",
        404 => "Not Found",
        _ => "Status",
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
