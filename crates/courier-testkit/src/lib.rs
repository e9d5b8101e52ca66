//! Courier Testing Infrastructure
//!
//! In-memory transport and fault injection for exercising servers built with
//! `courier-core` without a wire.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
//!
//! # Usage
//!
//! ```rust,ignore
//! use courier_testkit::{init_tracing, LoopbackTransport};
//!
//! #[tokio::test]
//! async fn my_test() {
//!     init_tracing();
//!     let transport = LoopbackTransport::new(providers);
//!     let mut alice = transport.connect(PeerId::from_label("alice"));
//!     transport.bind_event(&"files".into(), "on_changed")?;
//!     let reply = transport.call(alice.peer(), &"files".into(), "$read", args).await?;
//! }
//! ```

pub mod faults;
pub mod logging;
pub mod loopback;

pub use faults::{Fault, FaultPlan, FaultyDelivery};
pub use logging::init_tracing;
pub use loopback::{EventEnvelope, LoopbackTransport, PeerInbox};
