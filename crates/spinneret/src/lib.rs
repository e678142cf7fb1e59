//! # Spinneret - Arachne Circuit Pool Engine
//!
//! Maintains a pool of isolated Tor circuits. The [`pool::CircuitPool`]
//! creates, health-checks, allocates, recycles, and rotates circuits, and
//! binds per-circuit client sessions; worker tasks share it behind an `Arc`.
//!
//! ```text
//! Workers → CircuitPool → Control Port → Tor
//!                ↓
//!         Session cache (SOCKS egress)
//! ```

pub mod clock;
pub mod config;
pub mod control;
pub mod pool;
pub mod session;

pub use config::{AppConfig, TorConfig};
pub use pool::CircuitPool;
pub use session::TorSession;
