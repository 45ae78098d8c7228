//! Recursive retrieval against a local fixture server: accept/reject
//! pattern behavior, the redirect cap and robots deferral.

mod support;

use std::collections::HashMap;
use std::path::Path;

use support::{Route, TestServer, serve};
use tarik::{Config, Engine};

fn picture_site() -> TestServer {
    let mut routes = HashMap::new();
    routes.insert(
        "/index.html".to_owned(),
        Route::html(
            r#"<html><body>
               <a href="picture_a.jpeg">a</a>
               <a href="picture_A.jpeg">A</a>
               <a href="secondpage.html">more</a>
               </body></html>"#,
        ),
    );
    routes.insert(
        "/secondpage.html".to_owned(),
        Route::html(
            r#"<html><body>
               <a href="picture_b.jpeg">b</a>
               <a href="picture_B.JpeG">B</a>
               <a href="picture_c.png">c</a>
               </body></html>"#,
        ),
    );
    for name in ["picture_a.jpeg", "picture_A.jpeg", "picture_b.jpeg", "picture_B.JpeG"] {
        routes.insert(format!("/{name}"), Route::ok("image/jpeg", name.as_bytes().to_vec()));
    }
    routes.insert(
        "/picture_c.png".to_owned(),
        Route::ok("image/png", b"picture_c.png".to_vec()),
    );
    serve(routes)
}

fn recursive_config(prefix: &Path) -> Config {
    let mut config = Config::default();
    config.recursive = true;
    config.host_directories = false;
    config.robots = false;
    config.directory_prefix = Some(prefix.to_path_buf());
    config.tries = 2;
    config.max_threads = 2;
    config
}

fn run_site(server: &TestServer, config: Config) {
    let engine = Engine::new(config).unwrap();
    engine.queue_seed(&server.url("/index.html")).unwrap();
    assert_eq!(engine.run(), 0);
}

fn saved(prefix: &Path, names: &[&str]) -> Vec<String> {
    names
        .iter()
        .filter(|name| prefix.join(name).is_file())
        .map(|name| name.to_string())
        .collect()
}

const ALL_FILES: [&str; 7] = [
    "index.html",
    "secondpage.html",
    "picture_a.jpeg",
    "picture_A.jpeg",
    "picture_b.jpeg",
    "picture_B.JpeG",
    "picture_c.png",
];

#[test]
fn test_accept_suffix() {
    let server = picture_site();
    let dir = tempfile::tempdir().unwrap();
    let mut config = recursive_config(dir.path());
    config.accept = vec![".jpeg".to_owned()];

    run_site(&server, config);

    assert_eq!(
        saved(dir.path(), &ALL_FILES),
        ["picture_a.jpeg", "picture_A.jpeg", "picture_b.jpeg"]
    );
    // the non-matching pages were still probed and walked
    assert_eq!(server.hit_count("GET /secondpage.html"), 1);
    // the png was probed, never fetched
    assert_eq!(server.hit_count("HEAD /picture_c.png"), 1);
    assert_eq!(server.hit_count("GET /picture_c.png"), 0);
}

#[test]
fn test_accept_suffix_ignore_case() {
    let server = picture_site();
    let dir = tempfile::tempdir().unwrap();
    let mut config = recursive_config(dir.path());
    config.accept = vec![".jpeg".to_owned()];
    config.ignore_case = true;

    run_site(&server, config);

    assert_eq!(
        saved(dir.path(), &ALL_FILES),
        ["picture_a.jpeg", "picture_A.jpeg", "picture_b.jpeg", "picture_B.JpeG"]
    );
}

#[test]
fn test_reject_wildcards() {
    let server = picture_site();
    let dir = tempfile::tempdir().unwrap();
    let mut config = recursive_config(dir.path());
    config.reject = vec!["*picture_[ab]*".to_owned()];

    run_site(&server, config);

    assert_eq!(
        saved(dir.path(), &ALL_FILES),
        [
            "index.html",
            "secondpage.html",
            "picture_A.jpeg",
            "picture_B.JpeG",
            "picture_c.png"
        ]
    );
    assert_eq!(server.hit_count("GET /picture_a.jpeg"), 0);
    assert_eq!(server.hit_count("GET /picture_b.jpeg"), 0);
}

#[test]
fn test_redirect_cap() {
    let mut routes = HashMap::new();
    for hop in 0..6 {
        routes.insert(format!("/r{hop}"), Route::redirect(&format!("/r{}", hop + 1)));
    }
    routes.insert("/ok".to_owned(), Route::ok("text/plain", b"fine".to_vec()));
    let server = serve(routes);

    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.directory_prefix = Some(dir.path().to_path_buf());
    config.robots = false;
    config.max_redirect = 3;
    config.tries = 2;

    let engine = Engine::new(config).unwrap();
    engine.queue_seed(&server.url("/r0")).unwrap();
    engine.queue_seed(&server.url("/ok")).unwrap();
    engine.run();

    // exactly max-redirect hops past the seed, then the chain stops
    for hop in 0..4 {
        assert_eq!(server.hit_count(&format!("GET /r{hop}")), 1, "hop {hop}");
    }
    assert_eq!(server.hit_count("GET /r4"), 0);
    // the concurrent job is unaffected
    assert_eq!(std::fs::read(dir.path().join("ok")).unwrap(), b"fine");
}

#[test]
fn test_robots_gate_and_deferral() {
    let mut routes = HashMap::new();
    routes.insert(
        "/robots.txt".to_owned(),
        Route::ok("text/plain", b"User-agent: *\nDisallow: /private/\n".to_vec()),
    );
    routes.insert(
        "/index.html".to_owned(),
        Route::html(
            r#"<a href="/private/secret.html">s</a> <a href="/pub/page.html">p</a>"#,
        ),
    );
    routes.insert("/pub/page.html".to_owned(), Route::html("<p>public</p>"));
    routes.insert(
        "/private/secret.html".to_owned(),
        Route::html("<p>secret</p>"),
    );
    let server = serve(routes);

    let dir = tempfile::tempdir().unwrap();
    let mut config = recursive_config(dir.path());
    config.robots = true;

    run_site(&server, config);

    let hits = server.hits();
    // no request for the host goes out before its robots.txt answer
    assert_eq!(hits.first().map(String::as_str), Some("GET /robots.txt"));
    assert_eq!(server.hit_count("GET /index.html"), 1);
    assert_eq!(server.hit_count("GET /pub/page.html"), 1);
    // the disallowed path is never dispatched
    assert!(!hits.iter().any(|hit| hit.contains("/private/")));
    assert!(dir.path().join("pub/page.html").is_file());
}

#[test]
fn test_page_requisites_leaf() {
    let mut routes = HashMap::new();
    routes.insert(
        "/index.html".to_owned(),
        Route::html(r#"<a href="/leaf.html">next</a>"#),
    );
    routes.insert(
        "/leaf.html".to_owned(),
        Route::html(r#"<img src="/inline.png"> <a href="/too-deep.html">x</a>"#),
    );
    routes.insert("/inline.png".to_owned(), Route::ok("image/png", b"png".to_vec()));
    routes.insert("/too-deep.html".to_owned(), Route::html("<p>deep</p>"));
    let server = serve(routes);

    let dir = tempfile::tempdir().unwrap();
    let mut config = recursive_config(dir.path());
    config.level = 1;
    config.page_requisites = true;

    run_site(&server, config);

    // at depth == level only src-style references are followed
    assert_eq!(server.hit_count("GET /inline.png"), 1);
    assert_eq!(server.hit_count("GET /too-deep.html"), 0);
}
