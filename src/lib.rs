//! Legacy SOAP compatibility gateway
//!
//! Sits in front of a legacy grants SOAP service and forwards every accepted
//! request to it unchanged, while selected operations can be answered (or
//! shadow-compared) by an internal implementation.
//!
//! # Features
//!
//! - Streaming request forwarding with a bounded, inspectable head
//! - Per-operation routing registry with privilege requirements
//! - mTLS client certificate resolution to legacy credentials
//! - Internal response generation with automatic legacy fallback
//! - Shadow-mode structural diffs between internal and legacy responses
//! - Namespace-aware XML ⇄ structured data codec
//!
//! # Example
//!
//! ```ignore
//! use legacy_soap_gateway::{server, GatewayConfig, SoapGateway};
//!
//! let gateway = SoapGateway::from_config(&config, transport, store, responder)?;
//! let app = server::router(Arc::new(gateway));
//! axum::serve(listener, app).await?;
//! ```

pub mod auth;
pub mod codec;
pub mod config;
pub mod credential;
pub mod diff;
pub mod error;
pub mod framing;
pub mod gateway;
pub mod proxy;
pub mod registry;
pub mod responder;
pub mod schemas;
pub mod server;
pub mod streamer;

pub use config::GatewayConfig;
pub use error::{FaultMessage, GatewayError};
pub use gateway::SoapGateway;
pub use schemas::{ApiSurface, SoapRequest, SoapResponse};
