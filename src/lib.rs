//! # Pieces Library
//!
//! Connector pieces (Bexio, Xero, Zendesk, Pinecone) together with the
//! framework they are written against and the host runtime that enables
//! triggers, polls them on a schedule and receives their webhooks.

pub mod config;
pub mod db;
pub mod error;
pub mod framework;
pub mod handlers;
pub mod http;
pub mod models;
pub mod pieces;
pub mod polling;
pub mod repositories;
pub mod runtime;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod webhook_verification;
pub use migration;
