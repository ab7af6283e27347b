//! The client engine (`spec.md` §4.4): a typed, blocking call per RPC
//! method, overridable push handlers, and a listener worker that
//! demultiplexes responses from unsolicited pushes.

use std::collections::HashMap;
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::codec::{Reader, Writer};
use crate::dispatch::PushTable;
use crate::message::{
    self, read_frame, validate_datagram_frame, write_frame, RequestHeader, ResponseHeader,
    DEFAULT_MAX_FRAME_SIZE,
};
use crate::{Decode, Encode, Error};

/// Default per-call timeout (`spec.md` §5, §6).
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// The listener's receive-timeout poll cadence, used as a liveness tick so
/// it can observe the shutdown flag at a bounded interval (`spec.md` §5).
const LISTENER_POLL_INTERVAL: Duration = Duration::from_secs(1);

enum PendingSlot {
    Waiting,
    Ready(Vec<u8>),
}

/// The response-correlation queue: pending calls register themselves by
/// response message id before sending, and the listener delivers matching
/// frames here, signalling a condition on every insertion (`spec.md` §4.4,
/// §5).
#[derive(Default)]
struct PendingTable {
    state: Mutex<HashMap<u32, PendingSlot>>,
    cond: Condvar,
}

impl PendingTable {
    fn register(&self, message_id: u32) {
        self.state
            .lock()
            .expect("pending table lock poisoned")
            .insert(message_id, PendingSlot::Waiting);
    }

    /// Deliver a response frame to its waiter. Returns `false` if no call is
    /// (or ever was) waiting for this id - an unknown response id, dropped
    /// per `spec.md` §7.
    fn deliver(&self, message_id: u32, payload: Vec<u8>) -> bool {
        let mut state = self.state.lock().expect("pending table lock poisoned");
        match state.get_mut(&message_id) {
            Some(slot @ PendingSlot::Waiting) => {
                *slot = PendingSlot::Ready(payload);
                drop(state);
                self.cond.notify_all();
                true
            }
            Some(PendingSlot::Ready(_)) | None => false,
        }
    }

    /// Block until `message_id`'s response arrives or `timeout` elapses.
    ///
    /// On timeout the entry is left in the table in its `Waiting` state so
    /// a response that arrives later can still be recorded - it becomes the
    /// orphaned queue entry `spec.md` §5/§9 describe, reclaimed only by
    /// [`PendingTable::purge`] or on client destruction.
    fn wait(&self, message_id: u32, timeout: Duration) -> Option<Vec<u8>> {
        let mut state = self.state.lock().expect("pending table lock poisoned");
        let deadline = Instant::now() + timeout;

        loop {
            match state.remove(&message_id) {
                Some(PendingSlot::Ready(payload)) => return Some(payload),
                Some(PendingSlot::Waiting) => {
                    // Not ready yet - put it back and wait for a signal.
                    state.insert(message_id, PendingSlot::Waiting);
                }
                None => return None,
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }

            let (guard, result) = self
                .cond
                .wait_timeout(state, deadline - now)
                .expect("pending table lock poisoned");
            state = guard;
            if result.timed_out() && !matches!(state.get(&message_id), Some(PendingSlot::Ready(_)))
            {
                return None;
            }
        }
    }

    fn purge_all(&self) {
        self.state.lock().expect("pending table lock poisoned").clear();
    }
}

enum WriteHalf {
    Stream(TcpStream),
    Datagram(UdpSocket),
}

impl WriteHalf {
    fn send(&mut self, payload: &[u8]) -> Result<(), Error> {
        match self {
            WriteHalf::Stream(s) => write_frame(s, payload),
            WriteHalf::Datagram(s) => {
                let framed = message::frame_to_vec(payload);
                s.send(&framed)?;
                Ok(())
            }
        }
    }
}

enum ReadHalf {
    Stream(TcpStream),
    Datagram(UdpSocket),
}

/// A connected client instance: one transport endpoint, one listener
/// worker, one send-serialising lock and one response-correlation queue
/// (`spec.md` §3's client lifecycle).
pub struct Client {
    write: Mutex<WriteHalf>,
    pending: Arc<PendingTable>,
    push_table: Arc<PushTable>,
    shutdown: Arc<AtomicBool>,
    listener: Mutex<Option<JoinHandle<()>>>,
    call_timeout: Duration,
}

impl Client {
    /// Connect over the stream binding.
    pub fn connect_tcp<A: ToSocketAddrs>(addr: A) -> Result<Self, Error> {
        let stream = TcpStream::connect(addr)?;
        let read_half = stream.try_clone()?;
        Ok(Self::new(
            WriteHalf::Stream(stream),
            ReadHalf::Stream(read_half),
            DEFAULT_CALL_TIMEOUT,
            DEFAULT_MAX_FRAME_SIZE,
        ))
    }

    /// Connect over the datagram binding: binds an ephemeral local socket
    /// and fixes `addr` as the only peer.
    pub fn connect_udp<A: ToSocketAddrs>(addr: A) -> Result<Self, Error> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(addr)?;
        let read_half = socket.try_clone()?;
        Ok(Self::new(
            WriteHalf::Datagram(socket),
            ReadHalf::Datagram(read_half),
            DEFAULT_CALL_TIMEOUT,
            DEFAULT_MAX_FRAME_SIZE,
        ))
    }

    fn new(
        write: WriteHalf,
        mut read: ReadHalf,
        call_timeout: Duration,
        max_frame_size: u32,
    ) -> Self {
        let pending = Arc::new(PendingTable::default());
        let push_table = Arc::new(PushTable::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        match &mut read {
            ReadHalf::Stream(s) => s
                .set_read_timeout(Some(LISTENER_POLL_INTERVAL))
                .expect("setting read timeout"),
            ReadHalf::Datagram(s) => s
                .set_read_timeout(Some(LISTENER_POLL_INTERVAL))
                .expect("setting read timeout"),
        }

        let listener_pending = Arc::clone(&pending);
        let listener_push_table = Arc::clone(&push_table);
        let listener_shutdown = Arc::clone(&shutdown);
        let listener = std::thread::spawn(move || {
            listener_loop(
                read,
                listener_pending,
                listener_push_table,
                listener_shutdown,
                max_frame_size,
            );
        });

        Self {
            write: Mutex::new(write),
            pending,
            push_table,
            shutdown,
            listener: Mutex::new(Some(listener)),
            call_timeout,
        }
    }

    /// Override the handler invoked for a given push channel's message id.
    pub fn on_push(&self, channel_message_id: u32, handler: crate::dispatch::PushHandler) {
        self.push_table.set(channel_message_id, handler);
    }

    /// Invoke an RPC method, returning `Err` on transport failure, timeout
    /// or a malformed response.
    ///
    /// This is the low-level primitive generated per-method wrappers build
    /// on: it lets a wrapper distinguish "no answer" from "got an answer,
    /// now copy out-parameters back" without losing that information to the
    /// default-valued fallback (`spec.md` §9's in-out-on-failure question -
    /// decided here by giving the caller the choice).
    pub fn call_raw<Req: Encode, Resp: Decode>(
        &self,
        request_id: u32,
        response_id: u32,
        request: &Req,
    ) -> Result<Resp, Error> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(Error::Disconnected);
        }

        self.pending.register(response_id);

        let mut w = Writer::new();
        RequestHeader {
            message_id: request_id,
        }
        .encode_into(&mut w);
        request.encode_into(&mut w);

        {
            let mut write = self.write.lock().expect("send lock poisoned");
            if let Err(e) = write.send(w.as_slice()) {
                // The pending entry is left registered; it becomes an
                // orphan (spec.md §5) reclaimed on client destruction.
                return Err(e);
            }
        }

        let payload = self
            .pending
            .wait(response_id, self.call_timeout)
            .ok_or(Error::Timeout)?;

        let mut r = Reader::new(&payload);
        let header = ResponseHeader::decode_from(&mut r)?;
        debug_assert_eq!(header.message_id, response_id);
        Resp::decode_from(&mut r)
    }

    /// Invoke an RPC method, degrading to `Resp::default()` on timeout,
    /// transport failure or malformed response - the documented current
    /// behavior for methods with no out-parameters to preserve on failure
    /// (`spec.md` §4.4, §7).
    pub fn call<Req: Encode, Resp: Decode + Default>(
        &self,
        request_id: u32,
        response_id: u32,
        request: &Req,
    ) -> Resp {
        match self.call_raw(request_id, response_id, request) {
            Ok(resp) => resp,
            Err(e) => {
                warn!(request_id, response_id, error = %e, "call degraded to default value");
                Resp::default()
            }
        }
    }

    /// Stop the listener and mark the client disconnected. Idempotent.
    pub fn stop_listening(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.listener.lock().expect("listener lock poisoned").take() {
            let _ = handle.join();
        }
        self.pending.purge_all();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.stop_listening();
    }
}

fn listener_loop(
    mut read: ReadHalf,
    pending: Arc<PendingTable>,
    push_table: Arc<PushTable>,
    shutdown: Arc<AtomicBool>,
    max_frame_size: u32,
) {
    let mut datagram_buf = vec![0u8; max_frame_size as usize + message::MESSAGE_ID_LEN];

    while !shutdown.load(Ordering::SeqCst) {
        let payload = match &mut read {
            ReadHalf::Stream(s) => match read_frame(s, max_frame_size) {
                Ok(p) => p,
                Err(Error::Io(kind, _))
                    if kind == std::io::ErrorKind::WouldBlock
                        || kind == std::io::ErrorKind::TimedOut =>
                {
                    continue; // liveness tick, not teardown
                }
                Err(Error::Io(kind, _))
                    if kind == std::io::ErrorKind::UnexpectedEof
                        || kind == std::io::ErrorKind::ConnectionReset =>
                {
                    debug!("client transport closed, listener exiting");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "malformed frame on client transport, listener exiting");
                    break;
                }
            },
            ReadHalf::Datagram(s) => match s.recv(&mut datagram_buf) {
                Ok(n) => match validate_datagram_frame(&datagram_buf[..n], max_frame_size) {
                    Ok(p) => p.to_vec(),
                    Err(e) => {
                        warn!(error = %e, "malformed datagram, dropping");
                        continue;
                    }
                },
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue; // liveness tick
                }
                Err(e) => {
                    warn!(error = %e, "datagram transport error, listener exiting");
                    break;
                }
            },
        };

        let message_id = match message::peek_message_id(&payload) {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "could not read message id, dropping frame");
                continue;
            }
        };

        if push_table.contains(message_id) {
            trace!(message_id, "dispatching push");
            let body = &payload[message::MESSAGE_ID_LEN..];
            push_table.dispatch(message_id, body);
            continue;
        }

        if !pending.deliver(message_id, payload) {
            warn!(message_id, "unknown message id on client, dropping");
        }
    }
}
