//! Client for the Knowledge Engine Smart Connector REST API.
//!
//! This crate provides:
//! - [`EngineClient`] — register a smart connector and its knowledge
//!   interactions, post ASK queries
//! - [`EngineClient::handle_loop`] / [`EngineClient::answer_loop`] — the
//!   cancellable long-poll loop answering pending handle requests
//! - [`CancellationToken`] — cooperative shutdown for the loops

pub mod cancel;
pub mod client;

pub use cancel::CancellationToken;
pub use client::{AskResult, EngineClient, EngineResponse, Handler, HandlerMap};
