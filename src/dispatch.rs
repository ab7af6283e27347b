//! The abstract dispatch contract (`spec.md` §1, §4.5) generated code uses
//! to wire typed method handlers and push-channel handlers into the runtime,
//! plus the message id allocator a generator would use to assign ids from a
//! per-service base in declaration order (`spec.md` §4.3).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::Error;

/// Assigns message ids from a per-service base, in declaration order.
///
/// Each RPC method consumes two consecutive ids (even request, odd
/// response); each push channel consumes a single id. Calling the `next_*`
/// methods in the same order the IDL declares methods and channels
/// reproduces the same ids on every run, satisfying the "message ids are
/// stable across processes for a given IDL input" invariant (`spec.md` §3).
#[derive(Debug)]
pub struct MessageIdAllocator {
    base: u32,
    next_offset: u32,
}

impl MessageIdAllocator {
    /// Start allocating from `base` (the generator's per-service constant,
    /// e.g. `1000`).
    pub fn new(base: u32) -> Self {
        Self {
            base,
            next_offset: 0,
        }
    }

    /// Allocate the `(request_id, response_id)` pair for the next declared
    /// RPC method.
    pub fn next_method(&mut self) -> (u32, u32) {
        let request_id = self.base + self.next_offset;
        self.next_offset += 2;
        (request_id, request_id + 1)
    }

    /// Allocate the id for the next declared push channel.
    pub fn next_push_channel(&mut self) -> u32 {
        let id = self.base + self.next_offset;
        self.next_offset += 1;
        id
    }
}

/// Opaque identifier for a server-tracked client (`spec.md` §4.5): a
/// connected stream-binding socket, or a distinct datagram-binding sender
/// address. Assigned sequentially by the server as clients are registered;
/// stable for the tracked client's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub u64);

/// A server-side request handler: takes the raw request payload (the bytes
/// following the request's [`crate::message::RequestHeader`]) and the id of
/// the client the request arrived on, and returns the raw response payload
/// (the bytes to follow the matching [`crate::message::ResponseHeader`]),
/// or an error if the payload failed to decode.
///
/// Generated code registers one of these per IDL method; the closure body
/// is the bit the generator would normally emit: decode typed params,
/// invoke the user's abstract handler method, encode the typed return
/// value (and any out-parameters) back into bytes. The client id is handed
/// through so a handler can opt in to excluding its own caller from a
/// broadcast it triggers (`spec.md` §4.5).
pub type RequestHandler = Arc<dyn Fn(&[u8], ClientId) -> Result<Vec<u8>, Error> + Send + Sync>;

/// The server's message-id switch (`spec.md` §4.5): one entry per declared
/// RPC method's request id. Unknown ids are a dispatch miss - the caller
/// drains the payload and moves on rather than tearing down the connection.
#[derive(Default, Clone)]
pub struct DispatchTable {
    handlers: HashMap<u32, RequestHandler>,
}

impl DispatchTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for a method's request message id.
    ///
    /// Registering a response id or push-channel id here is a logic error
    /// in generated code, not something this runtime can catch generically
    /// - the table only ever sees message ids, not their provenance.
    pub fn register(&mut self, request_message_id: u32, handler: RequestHandler) {
        self.handlers.insert(request_message_id, handler);
    }

    /// Look up the handler for `message_id`, if any is registered.
    pub fn get(&self, message_id: u32) -> Option<&RequestHandler> {
        self.handlers.get(&message_id)
    }
}

impl std::fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchTable")
            .field("registered_ids", &{
                let mut ids: Vec<_> = self.handlers.keys().copied().collect();
                ids.sort_unstable();
                ids
            })
            .finish()
    }
}

/// A client-side push handler: takes the raw push payload (the bytes
/// following the push message's [`crate::message::RequestHeader`]).
///
/// The default for any channel the caller hasn't overridden is to ignore
/// the notification, per `spec.md` §6's handler surface.
pub type PushHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// The client's table of overridable push-channel handler slots, keyed by
/// the channel's message id.
///
/// Unlike [`DispatchTable`], this uses interior mutability: a caller can
/// install or replace a push handler at any point in the client's lifetime,
/// including while the listener thread is concurrently reading the table to
/// dispatch inbound pushes.
#[derive(Default)]
pub struct PushTable {
    handlers: RwLock<HashMap<u32, PushHandler>>,
}

impl PushTable {
    /// An empty table; every channel defaults to a no-op handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the handler slot for a push channel.
    pub fn set(&self, channel_message_id: u32, handler: PushHandler) {
        self.handlers
            .write()
            .expect("push table lock poisoned")
            .insert(channel_message_id, handler);
    }

    /// True if `message_id` names a push channel this table knows about.
    ///
    /// The client listener uses this to decide whether an inbound frame is
    /// an unsolicited push or a response to a pending call (`spec.md`
    /// §4.4).
    pub fn contains(&self, message_id: u32) -> bool {
        self.handlers
            .read()
            .expect("push table lock poisoned")
            .contains_key(&message_id)
    }

    /// Dispatch `payload` to the handler registered for `message_id`, if
    /// any; a channel with no override is a documented no-op, not a miss.
    pub fn dispatch(&self, message_id: u32, payload: &[u8]) {
        let handler = self
            .handlers
            .read()
            .expect("push table lock poisoned")
            .get(&message_id)
            .cloned();
        if let Some(handler) = handler {
            handler(payload);
        }
    }
}

impl std::fmt::Debug for PushTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushTable")
            .field("registered_channels", &{
                let mut ids: Vec<_> = self
                    .handlers
                    .read()
                    .expect("push table lock poisoned")
                    .keys()
                    .copied()
                    .collect();
                ids.sort_unstable();
                ids
            })
            .finish()
    }
}
