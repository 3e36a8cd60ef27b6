/// Padlock Cloud
///
/// Sync service for encrypted Padlock data. Devices authenticate with
/// email-confirmed auth tokens and read or replace an opaque per-account data
/// blob; a small web dashboard manages tokens and data.
pub mod account;
pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod mailer;
pub mod rate_limit;
pub mod server;
pub mod storage;
pub mod templates;
