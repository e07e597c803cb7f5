//! Viewer Session
//!
//! Purpose:
//!     Client-side counterpart of the hub. Applies snapshots under a version
//!     guard, reconnects with a bounded budget, and owns the rendering
//!     handles for each view.
//!
//! Architecture:
//!     reconnect.rs - connection state machine + shared reconnection policy
//!     session.rs   - envelope application, version guard, staleness
//!     render.rs    - RenderSurface trait, RenderSlots, headless LogSurface
//!     client.rs    - tokio-tungstenite connect/read loop

pub mod client;
pub mod reconnect;
pub mod render;
pub mod session;

pub use client::run_viewer;
pub use reconnect::{Backoff, ConnectionState, Decision, ReconnectPolicy, Reconnector};
pub use render::{LogSurface, RenderSlots, RenderSurface};
pub use session::{Applied, ViewerSession, ViewerState};
