//! # ApplyTrack Shared Library
//!
//! Types, data access and business rules used by both the ApplyTrack API
//! server and the reminder worker.
//!
//! ## Module Organization
//!
//! - `models`: database models, one per table, scoped by owning user
//! - `auth`: passwords, sessions, signed tokens, TOTP, login throttle
//! - `db`: pool and migrations
//! - `plan`: FREE/PRO plan limits and quota enforcement
//! - `billing`: payment provider client and webhook verification
//! - `oauth`: Google and GitHub sign-in
//! - `mail`: outbound email and templates
//! - `csv_io`: CSV import/export of applications

pub mod auth;
pub mod billing;
pub mod csv_io;
pub mod db;
pub mod mail;
pub mod models;
pub mod oauth;
pub mod plan;

/// Current version of the ApplyTrack shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
