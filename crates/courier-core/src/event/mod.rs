//! # Event Broadcast
//!
//! Event-stream members of a service are exposed to remote subscribers as
//! [`RpcEvent<T>`] values on the server.
//!
//! ## Core Types
//!
//! - [`RpcEvent<T>`]: publish side (`send_all`, `send_to`) plus the two
//!   observation hooks the transport listens on.
//! - [`ErasedRpcEvent`]: payload-erased view, used by transport code that
//!   only knows an event by name.
//! - [`EventFanout<T>`]: transport-side listener performing per-peer delivery
//!   with failure isolation.
//!
//! ## Flow
//!
//! ```rust,ignore
//! let event = RpcEvent::<String>::new();
//! let binding = Arc::new(EventFanout::new(directory, delivery, log)).attach(&event);
//!
//! // Everybody but the originator of the change:
//! event.send_all("saved".to_string(), &[*ctx.sender()]);
//! ```

mod broadcast;
mod erased;
mod fanout;

pub use broadcast::{EventHooks, Listener, ListenerHandle, RpcEvent, SendAll, SendTo};
pub use erased::{downcast_event, json_listener, EncodedPayload, ErasedRpcEvent};
pub use fanout::{
    deliver_each, recipients_for_all, recipients_for_targets, DeliveryError, DeliveryFailure,
    DeliveryLog, DeliveryReport, EventFanout, FanoutBinding, PeerDelivery, PeerDirectory,
};
