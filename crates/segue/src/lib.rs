//! Segue: seamless continuation over redirect-chained live segments.
//!
//! Some live origins never serve a playlist. Instead a stable base URI answers
//! with a redirect to whatever short segment is current, and every segment is
//! a finite body. This crate stitches those segments back into one unbounded
//! byte stream.
//!
//! ## Component Overview
//!
//! - [`ContinuationStream`] - The stitched reader, implements [`SequentialReader`]
//! - [`RedirectResolver`] - One-hop redirect probe of the base URI
//! - [`ContinuityTracker`] - Pending segments, recent history and gap detection
//! - [`PrefetchSlot`] - Single-flight delayed look-ahead probe
//! - [`TransportFactory`] - Opens the byte source for one segment
//! - [`BlockingReader`] - `std::io::Read` adapter for synchronous consumers

pub mod blocking;
pub mod client;
pub mod config;
pub mod error;
pub mod prefetch;
pub mod reader;
pub mod resolver;
pub mod stats;
pub mod stream;
pub mod tracker;
pub mod transport;

pub use blocking::BlockingReader;
pub use client::{RedirectMode, create_client};
pub use config::{DEFAULT_USER_AGENT, StreamSettings};
pub use error::SegueError;
pub use prefetch::{PrefetchOutcome, PrefetchSlot};
pub use reader::{SequentialReader, SessionHints};
pub use resolver::{HttpRedirectResolver, RedirectResolver};
pub use stats::SessionStats;
pub use stream::{ContinuationStream, StreamState};
pub use tracker::{ContinuityTracker, Discontinuity, SegmentDescriptor, UNKNOWN_TIMESTAMP};
pub use transport::{HttpTransportFactory, SegmentTransport, TransportFactory};
