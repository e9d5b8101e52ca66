//! Type-erased view of an event member for generic transport code.

use super::broadcast::{EventHooks, Listener, ListenerHandle, RpcEvent, SendAll, SendTo};
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;
use tracing::warn;

/// Payload rendered as JSON, or the reason it has no JSON form
pub type EncodedPayload = std::result::Result<Value, String>;

/// Event member whose payloads are observed as JSON values
pub trait ErasedRpcEvent: Send + Sync {
    /// Rust type name of the payload
    fn payload_type(&self) -> &'static str;

    /// Total listeners across both hooks
    fn listener_count(&self) -> usize;

    /// Observe every `send_all` publish, including payloads that failed to encode
    fn on_send_all_encoded(&self, listener: Listener<SendAll<EncodedPayload>>) -> ListenerHandle;

    /// Observe every `send_to` publish, including payloads that failed to encode
    fn on_send_to_encoded(&self, listener: Listener<SendTo<EncodedPayload>>) -> ListenerHandle;

    /// Access the concrete event for downcasting
    fn as_any(&self) -> &dyn Any;

    /// Observe `send_all` publishes whose payload has a JSON form
    fn on_send_all_json(&self, listener: Listener<SendAll<Value>>) -> ListenerHandle {
        self.on_send_all_encoded(Arc::new(move |notice: &SendAll<EncodedPayload>| {
            match &notice.value {
                Ok(value) => listener(&SendAll {
                    value: value.clone(),
                    exceptions: notice.exceptions.clone(),
                }),
                Err(err) => warn!(error = %err, "Skipping event payload that has no JSON form"),
            }
        }))
    }

    /// Observe `send_to` publishes whose payload has a JSON form
    fn on_send_to_json(&self, listener: Listener<SendTo<Value>>) -> ListenerHandle {
        self.on_send_to_encoded(Arc::new(move |notice: &SendTo<EncodedPayload>| {
            match &notice.value {
                Ok(value) => listener(&SendTo {
                    value: value.clone(),
                    targets: notice.targets.clone(),
                }),
                Err(err) => warn!(error = %err, "Skipping event payload that has no JSON form"),
            }
        }))
    }
}

fn encode<T: Serialize>(value: &T) -> EncodedPayload {
    serde_json::to_value(value).map_err(|err| err.to_string())
}

impl<T> ErasedRpcEvent for RpcEvent<T>
where
    T: Serialize + Send + Sync + 'static,
{
    fn payload_type(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn listener_count(&self) -> usize {
        RpcEvent::listener_count(self)
    }

    fn on_send_all_encoded(&self, listener: Listener<SendAll<EncodedPayload>>) -> ListenerHandle {
        self.on_send_all(move |notice: &SendAll<T>| {
            listener(&SendAll {
                value: encode(&notice.value),
                exceptions: notice.exceptions.clone(),
            })
        })
    }

    fn on_send_to_encoded(&self, listener: Listener<SendTo<EncodedPayload>>) -> ListenerHandle {
        self.on_send_to(move |notice: &SendTo<T>| {
            listener(&SendTo {
                value: encode(&notice.value),
                targets: notice.targets.clone(),
            })
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Transports fan out the encoded form so encoding failures reach their delivery log
impl EventHooks<EncodedPayload> for dyn ErasedRpcEvent + '_ {
    fn hook_send_all(&self, listener: Listener<SendAll<EncodedPayload>>) -> ListenerHandle {
        self.on_send_all_encoded(listener)
    }

    fn hook_send_to(&self, listener: Listener<SendTo<EncodedPayload>>) -> ListenerHandle {
        self.on_send_to_encoded(listener)
    }
}

/// Downcast an erased event back to its concrete payload type
pub fn downcast_event<T: 'static>(event: &dyn ErasedRpcEvent) -> Option<&RpcEvent<T>> {
    event.as_any().downcast_ref::<RpcEvent<T>>()
}

/// Wrap a JSON listener closure for [`ErasedRpcEvent`] registration
pub fn json_listener<N>(listener: impl Fn(&N) + Send + Sync + 'static) -> Listener<N> {
    Arc::new(listener)
}
