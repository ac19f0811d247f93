//! Tokengate - Token-Bucket Admission Gate
//!
//! This crate puts a single-process, in-memory token bucket in front of an
//! HTTP endpoint. Requests over the limit are answered with
//! `429 Too Many Requests` and `X-RateLimit-*` headers. The server drains
//! in-flight requests on SIGINT, SIGTERM or a line on standard input, within
//! a fixed grace period.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod shutdown;
