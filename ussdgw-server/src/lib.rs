//! # ussdgw-server
//!
//! TCP server for the USSD gateway.
//!
//! This crate provides:
//! - TCP connection handling with async I/O
//! - Per-connection frame queueing and strictly ordered dispatch
//! - The session state machine (unbound, bound, unbinding, closed)
//! - Credential validation for bind requests
//! - The HTTP application gateway bridging submits to the backend

pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod server;
pub mod session;

pub use auth::{CredentialValidator, StaticCredentials};
pub use config::{AppConfig, AuthConfig, Config, LimitsConfig, NetworkConfig};
pub use dispatch::Dispatcher;
pub use error::ServerError;
pub use gateway::{AppReply, AppRequest, ApplicationGateway, HttpGateway};
pub use server::{Server, ServerConfig, ServerStats};
pub use session::{ConnectionState, Session};
