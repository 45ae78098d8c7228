//! # Recursive HTTP Downloader Engine
//!
//! This library provide the core of a multi-worker recursive downloader:
//! starting from a seed set of URLs, resources are fetched over HTTP/1.1,
//! parsed for linked resources according to content type, filtered against
//! a recursion policy and enqueued as follow-up work.
//!
//! # Library Design
//!
//! The protocol definitions are usable on their own as building blocks; the
//! [`engine`] module combines all components into a ready to run worker
//! pool.
//!
//! ## Definitions
//!
//! - [`uri`] canonical URLs ([RFC3986])
//! - [`headers`] HTTP header field grammars ([RFC9110 Section 5])
//! - [`http`] HTTP/1.1 message framing ([RFC9112])
//!
//! ## Behaviors
//!
//! - [`conn`] pinned transport connections
//! - [`decomp`] streaming content decoding
//! - [`queue`], [`blacklist`], [`hosts`], [`policy`] the recursive work engine
//! - [`worker`] the per-thread download state machine
//! - [`fname`], [`save`] local path derivation and atomic writes
//!
//! ## Integrations
//!
//! - [`engine`] all in one API to run a download
//!
//! # Usage
//!
//! ```no_run
//! use tarik::{Config, Engine};
//!
//! let mut config = Config::default();
//! config.recursive = true;
//! let engine = Engine::new(config).unwrap();
//! engine.queue_seed("http://example.com/").unwrap();
//! let status = engine.run();
//! std::process::exit(status);
//! ```
//!
//! [RFC3986]: <https://www.rfc-editor.org/rfc/rfc3986.html>
//! [RFC9110 Section 5]: <https://www.rfc-editor.org/rfc/rfc9110.html#name-fields>
//! [RFC9112]: <https://www.rfc-editor.org/rfc/rfc9112.html>
#![warn(missing_debug_implementations)]

mod log;

// definitions
pub mod uri;
pub mod headers;
pub mod http;

// transport
pub mod conn;
pub mod decomp;

// recursive work engine
pub mod blacklist;
pub mod hosts;
pub mod job;
pub mod policy;
pub mod queue;
pub mod robots;

// collaborator state
pub mod auth;
pub mod cookie;
pub mod hsts;
pub mod netrc;
pub mod state;

// output
pub mod extract;
pub mod fname;
pub mod save;

// integration
pub mod config;
pub mod context;
pub mod engine;
pub mod stats;
pub mod worker;

pub use config::Config;
pub use engine::{Engine, EngineError, ShutdownHandle};
pub use http::BodySink;
pub use uri::{Uri, UriError};
