//! Natives through which the interpreted poll loop talks to the scheduler.
//!
//! A bridge lives for exactly one burst. The scheduler hands it an immutable
//! [`BridgeRequest`] and reads the [`CallbackResponse`] slot afterwards.

use super::host::Host;
use super::queue::{EventEntry, EventQueue, Timers};
use crate::debugger::BridgeSignals;
use crate::interpreter::{CallbackRef, CallbackRequest, Natives, Value};
use std::time::{Duration, Instant};
use tracing::warn;

pub const LATE_RETURN_WARNING: &str =
    "WARNING: Function passed to onEvent() has taken too long - the return value was ignored.";
pub const LATE_RETURN_HINT: &str = "  (try moving the speed slider to its maximum value)";

#[derive(Debug, Clone, Copy)]
pub struct BridgeRequest {
    /// A native caller is blocked on the callback's return value.
    pub run_until_callback_return: bool,
    pub at_max_speed: bool,
    pub max_marshal_depth: usize,
    pub now: Instant,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallbackResponse {
    pub seen_empty_get_callback: bool,
    pub seen_return: bool,
    pub last_ret_val: Option<Value>,
}

impl CallbackResponse {
    pub fn signals(&self, request: &BridgeRequest) -> BridgeSignals {
        BridgeSignals {
            seen_empty_queue: self.seen_empty_get_callback,
            seen_callback_return: self.seen_return,
            run_until_callback_return: request.run_until_callback_return,
        }
    }
}

pub struct CallbackBridge<'a> {
    request: BridgeRequest,
    queue: &'a mut EventQueue,
    timers: &'a mut Timers,
    response: &'a mut CallbackResponse,
    host: &'a mut dyn Host,
}

impl<'a> CallbackBridge<'a> {
    pub fn new(
        request: BridgeRequest,
        queue: &'a mut EventQueue,
        timers: &'a mut Timers,
        response: &'a mut CallbackResponse,
        host: &'a mut dyn Host,
    ) -> Self {
        Self {
            request,
            queue,
            timers,
            response,
            host,
        }
    }
}

impl Natives for CallbackBridge<'_> {
    fn get_callback(&mut self) -> Option<CallbackRequest> {
        match self.queue.pop_or_none() {
            Some(entry) => Some(CallbackRequest {
                callback: entry.callback,
                arguments: entry
                    .arguments
                    .iter()
                    .map(|arg| marshal(arg, self.request.max_marshal_depth))
                    .collect(),
            }),
            None => {
                self.response.seen_empty_get_callback = true;
                None
            }
        }
    }

    fn set_callback_ret_val(&mut self, value: Value) {
        // Only a return that leaves the queue empty can belong to a waiting
        // native caller.
        if self.queue.is_empty() {
            self.response.seen_return = true;
            self.response.last_ret_val = Some(value);
        }
        if self.request.run_until_callback_return {
            return;
        }
        let Some(stashed) = self.response.last_ret_val.take() else {
            return;
        };
        if stashed.is_null() {
            return;
        }
        warn!(value = %stashed, "callback return value arrived after its caller moved on");
        self.host.output(LATE_RETURN_WARNING);
        if !self.request.at_max_speed {
            self.host.output(LATE_RETURN_HINT);
        }
    }

    fn set_timeout(&mut self, callback: CallbackRef, delay: Duration, arguments: Vec<Value>) {
        self.timers.register(
            self.request.now,
            delay,
            EventEntry::new(callback, arguments),
        );
    }

    fn output(&mut self, text: &str) {
        self.host.output(text);
    }
}

/// Copy a host value for the interpreter. Containers nested deeper than
/// `max_depth` are replaced with null.
pub fn marshal(value: &Value, max_depth: usize) -> Value {
    match value {
        Value::Array(_) | Value::Object(_) if max_depth == 0 => Value::Null,
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| marshal(item, max_depth - 1))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), marshal(item, max_depth - 1)))
                .collect(),
        ),
        scalar => scalar.clone(),
    }
}
