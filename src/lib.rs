/// MaystorFix chat backend
///
/// Provider chat links, single-use chat tokens, customer/provider
/// conversations with a WebSocket gateway, notification fan-out and
/// capped competitive bidding on service cases.

pub mod account;
pub mod api;
pub mod auth;
pub mod cases;
pub mod chat;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod gateway;
pub mod jobs;
pub mod notifications;
pub mod server;
