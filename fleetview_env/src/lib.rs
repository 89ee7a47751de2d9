//! FleetView Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" boundary that lets the FleetView
//! tracking engines run in both **Production** (tokio + a real dispatch
//! backend) and **Simulation** (virtual clock + scripted backend).
//!
//! # Core Concept
//!
//! Everything the tracking core touches outside its own memory goes
//! through one of two traits:
//! - Time and task scheduling (`now()`, `sleep()`, `spawn()`)
//! - The dispatch backend (`get(path)` returning raw JSON bytes)
//!
//! Swapping the implementations makes every poll cycle reproducible.
//!
//! # Example
//!
//! ```ignore
//! use fleetview_env::{FleetContext, JsonTransport};
//!
//! async fn poll_loop<Ctx: FleetContext, T: JsonTransport>(ctx: &Ctx, transport: &T) {
//!     loop {
//!         let body = transport.get("/vehicles").await;
//!         handle(body);
//!         ctx.sleep(Duration::from_secs(15)).await;
//!     }
//! }
//! ```

mod context;
mod error;
mod tokio_impl;
mod transport;
mod types;

pub use context::FleetContext;
pub use error::ApiError;
pub use tokio_impl::TokioContext;
pub use transport::JsonTransport;
pub use types::{EntityId, SessionId};
