//! Wire-level behavior against the fixture server: chunked framing,
//! connection reuse, parallel part downloads, authentication and
//! timestamping.

mod support;

use std::collections::HashMap;

use base64::Engine as _;
use sha2::Digest as _;
use support::{Route, serve};
use tarik::{Config, Engine};

fn base_config(prefix: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.directory_prefix = Some(prefix.to_path_buf());
    config.robots = false;
    config.tries = 2;
    config
}

#[test]
fn test_chunked_download_and_connection_reuse() {
    let mut payload = Vec::new();
    payload.push(b'S');
    payload.extend(std::iter::repeat_n(b'x', 65535));
    payload.push(b'E');

    let mut routes = HashMap::new();
    routes.insert(
        "/chunked.bin".to_owned(),
        Route {
            status: 200,
            content_type: "application/octet-stream".to_owned(),
            body: payload.clone(),
            chunk_sizes: Some(vec![1, 65535, 1]),
            ..Route::default()
        },
    );
    routes.insert("/empty".to_owned(), Route::ok("text/plain", Vec::new()));
    routes.insert("/after".to_owned(), Route::ok("text/plain", b"after".to_vec()));
    let server = serve(routes);

    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path());
    config.max_threads = 1;

    let engine = Engine::new(config).unwrap();
    engine.queue_seed(&server.url("/chunked.bin")).unwrap();
    engine.queue_seed(&server.url("/empty")).unwrap();
    engine.queue_seed(&server.url("/after")).unwrap();
    assert_eq!(engine.run(), 0);

    // the trailer was consumed and the exact bytes delivered
    assert_eq!(std::fs::read(dir.path().join("chunked.bin")).unwrap(), payload);
    // a Content-Length of 0 produces an empty body
    assert_eq!(std::fs::read(dir.path().join("empty")).unwrap(), b"");
    assert_eq!(std::fs::read(dir.path().join("after")).unwrap(), b"after");
    // all three fetches rode one connection
    assert_eq!(server.connection_count(), 1);
}

#[test]
fn test_parallel_parts_assemble_and_verify() {
    let payload: Vec<u8> = (0..1_000_000u32).map(|i| (i % 251) as u8).collect();
    let digest = base64::engine::general_purpose::STANDARD
        .encode(sha2::Sha256::digest(&payload));

    let mut routes = HashMap::new();
    routes.insert(
        "/big.bin".to_owned(),
        Route {
            status: 200,
            content_type: "application/octet-stream".to_owned(),
            body: payload.clone(),
            ranged: true,
            ..Route::default()
        }
        .with_header("Digest", &format!("SHA-256={digest}")),
    );
    let server = serve(routes);

    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path());
    config.chunk_size = 100_000;
    config.max_threads = 4;

    let engine = Engine::new(config).unwrap();
    engine.queue_seed(&server.url("/big.bin")).unwrap();
    assert_eq!(engine.run(), 0);

    // one probe, ten ranged part requests
    assert_eq!(server.hit_count("HEAD /big.bin"), 1);
    assert_eq!(server.hit_count("GET /big.bin"), 10);
    assert_eq!(std::fs::read(dir.path().join("big.bin")).unwrap(), payload);
}

#[test]
fn test_basic_auth_retry_once() {
    let mut routes = HashMap::new();
    routes.insert(
        "/secret.txt".to_owned(),
        Route {
            auth_realm: Some("files".to_owned()),
            ..Route::ok("text/plain", b"let me in".to_vec())
        },
    );
    let server = serve(routes);

    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path());
    config.http_username = Some("alice".to_owned());
    config.http_password = Some("s3cret".to_owned());

    let engine = Engine::new(config).unwrap();
    engine.queue_seed(&server.url("/secret.txt")).unwrap();
    assert_eq!(engine.run(), 0);

    assert_eq!(server.hit_count("GET /secret.txt"), 2);
    assert_eq!(
        std::fs::read(dir.path().join("secret.txt")).unwrap(),
        b"let me in"
    );
}

#[test]
fn test_missing_page_sets_http_exit_status() {
    let server = serve(HashMap::new());
    let dir = tempfile::tempdir().unwrap();

    let engine = Engine::new(base_config(dir.path())).unwrap();
    engine.queue_seed(&server.url("/gone")).unwrap();
    assert_eq!(engine.run(), 8);
}

#[test]
fn test_last_modified_restored() {
    let mut routes = HashMap::new();
    routes.insert(
        "/dated.txt".to_owned(),
        Route::ok("text/plain", b"old content".to_vec())
            .with_header("Last-Modified", "Sun, 02 Oct 2016 14:44:11 GMT"),
    );
    let server = serve(routes);

    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(base_config(dir.path())).unwrap();
    engine.queue_seed(&server.url("/dated.txt")).unwrap();
    assert_eq!(engine.run(), 0);

    let mtime = std::fs::metadata(dir.path().join("dated.txt"))
        .unwrap()
        .modified()
        .unwrap()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs();
    assert_eq!(mtime, 1475419451);
}

#[test]
fn test_gzip_content_encoding() {
    use std::io::Write;
    let mut encoder =
        flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(b"inflate me please").unwrap();
    let gz = encoder.finish().unwrap();

    let mut routes = HashMap::new();
    routes.insert(
        "/page.txt".to_owned(),
        Route::ok("text/plain", gz).with_header("Content-Encoding", "gzip"),
    );
    let server = serve(routes);

    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(base_config(dir.path())).unwrap();
    engine.queue_seed(&server.url("/page.txt")).unwrap();
    assert_eq!(engine.run(), 0);

    assert_eq!(
        std::fs::read(dir.path().join("page.txt")).unwrap(),
        b"inflate me please"
    );
}
