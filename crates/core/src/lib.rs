//! # rtsp_relay — RTSP relay server library
//!
//! A Rust library implementing an RTSP (RFC 2326) relay server: it accepts
//! live media publishers ("sources") over ANNOUNCE/RECORD and fans their
//! RTP/RTCP media out to pull clients subscribed to the same mount point
//! over SETUP/PLAY. The server forwards RTP/RTCP byte-for-byte — it never
//! inspects or rebuilds RTP headers and does no transcoding.
//!
//! ## Protocol references
//!
//! | RFC | Topic | How this crate uses it |
//! |-----|-------|----------------------|
//! | [RFC 2326](https://tools.ietf.org/html/rfc2326) | RTSP 1.0 | Request/response parsing, session lifecycle, transport negotiation, interleaved framing (§10.12) |
//! | [RFC 3550](https://tools.ietf.org/html/rfc3550) | RTP/RTCP | Even/odd port pairing; payloads are forwarded unmodified |
//! | [RFC 4566](https://tools.ietf.org/html/rfc4566) | SDP | Passed through verbatim between ANNOUNCE and DESCRIBE |
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │  CLI (rtsp-cli)                           │
//! ├──────────────────────────────────────────┤
//! │  Server        — public API, orchestrator│
//! │  MountRegistry — named stream endpoints  │
//! ├──────────────────────────────────────────┤
//! │  Protocol      — RTSP parsing, SDP, etc. │
//! │  Session       — state machine           │
//! ├──────────────────────────────────────────┤
//! │  Transport     — TCP signaling, UDP data │
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use rtsp_relay::{Config, Server};
//!
//! let mut server = Server::new(Config::default());
//! server.start().unwrap();
//! ```
//!
//! ## Crate layout
//!
//! - [`server`] — High-level [`Server`] orchestrator.
//! - [`config`] — JSON startup [`Config`](config::Config).
//! - [`mount`] — [`Mount`] (stream endpoint) and [`MountRegistry`].
//! - [`protocol`] — RTSP request/response parsing and SDP passthrough.
//! - [`session`] — RTSP session state machine.
//! - [`transport`] — TCP connection handling for RTSP signaling, UDP transport for RTP delivery.
//! - [`error`] — [`RtspError`] enum and [`Result`] alias.

pub mod config;
pub mod error;
pub mod mount;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

pub use config::Config;
pub use error::{Result, RtspError};
pub use mount::{Mount, MountRegistry};
pub use server::Server;
