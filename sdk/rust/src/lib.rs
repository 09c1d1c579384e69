//! Client SDK for the node gateway.

pub mod client;

pub use client::{GatewayClient, NodeSession, SdkError};
