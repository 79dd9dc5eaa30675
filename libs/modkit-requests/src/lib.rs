#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Option-driven HTTP requests for `ModKit`
//!
//! Calls take a [`Context`], a URL and a list of options that shape the
//! request:
//! - Query strings from string pairs or any `Serialize` record
//! - JSON, XML, form, raw, streamed and `multipart/form-data` file bodies
//! - Headers and cookies, with optional cookie sessions across calls
//! - Before and after hooks, plus request/response dumps for debugging
//! - Retries with exponential backoff
//!
//! Each call runs in its own task. It returns as soon as its context is
//! cancelled or its deadline passes, and a panic inside a hook or the
//! transport comes back as [`HttpError::Panic`].
//!
//! The transport is a hyper client behind a tower stack: rustls (HTTPS only by
//! default), connection pooling, per-attempt timeouts, redirects,
//! User-Agent injection and transparent response decompression.
//!
//! # Example
//!
//! ```ignore
//! use modkit_requests::{Context, Requests, with_json, with_retry};
//! use std::time::Duration;
//!
//! let ctx = Context::background().with_timeout(Duration::from_secs(10));
//!
//! // Process-wide default client
//! let mut resp = modkit_requests::get(&ctx, "https://example.com/api", vec![]).await?;
//! let data: MyData = resp.json().await?;
//!
//! // Client with defaults applied to every call
//! let api = Requests::new(vec![with_retry(None)]);
//! let resp = api
//!     .post(&ctx, "https://example.com/items", vec![with_json(&item)])
//!     .await?;
//! ```

mod builder;
mod client;
mod config;
mod context;
pub mod encode;
mod error;
mod executor;
mod jar;
mod layers;
mod middleware;
pub mod multipart;
mod option;
mod response;
mod retry;
mod tls;
mod transport;

pub use ::cookie::Cookie;
pub use builder::HttpClientBuilder;
pub use client::{
    Requests, connect, delete, execute, get, head, options, patch, post, put, trace,
};
pub use config::{
    DEFAULT_RETRY_RESPONSE_DRAIN_LIMIT, DEFAULT_USER_AGENT, ExponentialBackoff, HttpClientConfig,
    RetryConfig, RetryTrigger, TlsRootConfig, TransportSecurity,
};
pub use context::Context;
pub use encode::{EncodeError, encode_map, encode_struct};
pub use error::{BoxError, CancelReason, ErrorKind, HttpError, InvalidUriKind, UNKNOWN_PANIC_MESSAGE};
pub use jar::{CookieJar, parse_set_cookies};
pub use layers::{CookieLayer, CookieService, UserAgentLayer, UserAgentService};
pub use middleware::{AfterResponse, BeforeRequest, DEBUG_TARGET, Request};
pub use multipart::File;
pub use option::{
    BoxedReader, FORM_CONTENT_TYPE, JSON_CONTENT_TYPE, RequestOption, RequestOptions,
    XML_CONTENT_TYPE, with_after, with_after_hooks, with_before, with_before_hooks, with_body,
    with_client, with_cookies, with_debug, with_file, with_form, with_header, with_headers,
    with_json, with_param, with_query, with_reader, with_retry, with_session, with_xml,
};
pub use response::{Response, ResponseBody};
pub use retry::{
    ABSOLUTE_MAX_ATTEMPTS, Outcome, RETRY_ATTEMPT_HEADER, RetryLayer, RetryPolicy, RetryService,
    calculate_backoff,
};
pub use tls::{crypto_provider, native_root_certs};
pub use transport::{HttpClient, TransportService};
