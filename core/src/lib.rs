//! Network core for the cat gallery client.
//!
//! # Overview
//! Builds request descriptors, hands them to a pluggable `Transport`, tracks
//! in-flight tasks so they can be cancelled, and turns raw outcomes into
//! typed results or one `RequestError` each.
//!
//! # Design
//! - `http` is pure: descriptors and raw outcomes, no I/O.
//! - `error::classify` is the single place outcomes become errors.
//! - `RequestExecutor` owns the task table and the image cache; each operation
//!   resolves its `Pending` exactly once.
//! - `GalleryClient` is the cat API on top of the executor.
//! - DTOs are defined independently from the mock-server crate; integration
//!   tests catch schema drift.

pub mod cache;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod http;
pub mod pending;
pub mod transport;
pub mod types;

pub use cache::ImageCache;
pub use client::GalleryClient;
pub use config::{ClientConfig, ConfigError};
pub use dispatch::{Dispatcher, Immediate, MainLoop, MainQueue};
pub use error::{classify, ErrorCause, RequestError};
pub use executor::{ExecutorBuilder, RequestExecutor};
pub use http::{build_request, CachePolicy, HttpMethod, RawResponse, RequestBuilder, RequestDescriptor, TransportOutcome};
pub use pending::Pending;
pub use transport::{CompletionHandler, DataTask, FakeTransport, TaskId, Transport, TransportError, UreqTransport};
pub use types::{filter_by_tag, Cat};
