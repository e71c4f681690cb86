//! # ApplyTrack API Server Library
//!
//! HTTP layer of ApplyTrack: state, router, request extractors, middleware
//! and one handler module per resource.
//!
//! ## Modules
//!
//! - `app`: Application state and router builder
//! - `config`: Configuration management
//! - `error`: Error handling and HTTP response mapping
//! - `extract`: Validating request extractors and client metadata
//! - `middleware`: Session auth, rate limiting, security headers
//! - `routes`: API route handlers

pub mod app;
pub mod config;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod routes;
