//! The server engine (`spec.md` §4.5): accept/track clients, dispatch
//! inbound requests to the abstract handler table, and broadcast pushes to
//! every tracked client.

use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, warn};

use crate::dispatch::{ClientId, DispatchTable};
use crate::message::{
    self, read_frame, validate_datagram_frame, write_frame, ResponseHeader, DEFAULT_MAX_FRAME_SIZE,
};
use crate::Error;

/// How often the accept/worker/recv loops poll their shutdown flag
/// (`spec.md` §5).
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Callback invoked when a client connects or disconnects (stream binding
/// only - `spec.md` §4.5's `on-client-connected`/`on-client-disconnected`
/// hooks).
pub type ClientLifecycleHook = Arc<dyn Fn(ClientId) + Send + Sync>;

enum Binding {
    Stream {
        listener: TcpListener,
        clients: Arc<Mutex<HashMap<ClientId, Arc<Mutex<TcpStream>>>>>,
        next_id: Arc<AtomicU64>,
        workers: Mutex<Vec<JoinHandle<()>>>,
    },
    Datagram {
        socket: Arc<UdpSocket>,
        clients: Arc<Mutex<HashMap<ClientId, SocketAddr>>>,
        addr_to_id: Arc<Mutex<HashMap<SocketAddr, ClientId>>>,
        next_id: Arc<AtomicU64>,
    },
}

/// A running (or not-yet-started) server instance: one bind endpoint, the
/// tracked-client set, and (stream binding) a pool of per-connection
/// workers (`spec.md` §3's server lifecycle).
pub struct Server {
    dispatch: Arc<DispatchTable>,
    max_frame_size: u32,
    shutdown: Arc<AtomicBool>,
    on_connected: Option<ClientLifecycleHook>,
    on_disconnected: Option<ClientLifecycleHook>,
    binding: Binding,
}

impl Server {
    /// Bind the stream binding to `addr`.
    pub fn bind_tcp<A: ToSocketAddrs>(addr: A, dispatch: DispatchTable) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            dispatch: Arc::new(dispatch),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            shutdown: Arc::new(AtomicBool::new(false)),
            on_connected: None,
            on_disconnected: None,
            binding: Binding::Stream {
                listener,
                clients: Arc::new(Mutex::new(HashMap::new())),
                next_id: Arc::new(AtomicU64::new(0)),
                workers: Mutex::new(Vec::new()),
            },
        })
    }

    /// Bind the datagram binding to `addr`.
    pub fn bind_udp<A: ToSocketAddrs>(addr: A, dispatch: DispatchTable) -> Result<Self, Error> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        Ok(Self {
            dispatch: Arc::new(dispatch),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            shutdown: Arc::new(AtomicBool::new(false)),
            on_connected: None,
            on_disconnected: None,
            binding: Binding::Datagram {
                socket: Arc::new(socket),
                clients: Arc::new(Mutex::new(HashMap::new())),
                addr_to_id: Arc::new(Mutex::new(HashMap::new())),
                next_id: Arc::new(AtomicU64::new(0)),
            },
        })
    }

    /// Install the hook run just before a stream connection's worker starts
    /// reading frames.
    pub fn on_client_connected(&mut self, hook: ClientLifecycleHook) {
        self.on_connected = Some(hook);
    }

    /// Install the hook run just after a stream connection's worker exits.
    pub fn on_client_disconnected(&mut self, hook: ClientLifecycleHook) {
        self.on_disconnected = Some(hook);
    }

    /// The number of clients currently tracked (connected sockets for the
    /// stream binding, distinct senders seen for the datagram binding).
    pub fn client_count(&self) -> usize {
        match &self.binding {
            Binding::Stream { clients, .. } => clients.lock().expect("client set poisoned").len(),
            Binding::Datagram { clients, .. } => clients.lock().expect("client set poisoned").len(),
        }
    }

    /// Serialise `payload` once under `message_id` and send it to every
    /// tracked client, optionally skipping `exclude` (used to avoid echoing
    /// a push back to the connection that triggered it).
    ///
    /// The stream binding holds the client-set lock across the full
    /// broadcast send, per `spec.md` §4.5/§9 - a single slow client can
    /// stall the others. That tradeoff is documented as a redesign
    /// candidate in the original notes, not something this runtime changes.
    pub fn broadcast(
        &self,
        message_id: u32,
        payload: &[u8],
        exclude: Option<ClientId>,
    ) -> Result<(), Error> {
        let mut w = crate::codec::Writer::new();
        message::RequestHeader { message_id }.encode_into(&mut w);
        w.write_bytes(payload);
        let framed = message::frame_to_vec(w.as_slice());
        // With the `bytes` feature, the frame is built once and handed to
        // every tracked client as a cheap refcount bump rather than copied
        // per send.
        #[cfg(feature = "bytes")]
        let framed = bytes::Bytes::from(framed);

        match &self.binding {
            Binding::Stream { clients, .. } => {
                let clients = clients.lock().expect("client set poisoned");
                for (id, stream) in clients.iter() {
                    if Some(*id) == exclude {
                        continue;
                    }
                    let mut stream = stream.lock().expect("client stream poisoned");
                    #[cfg(feature = "bytes")]
                    let result = std::io::Write::write_all(&mut *stream, &framed.clone());
                    #[cfg(not(feature = "bytes"))]
                    let result = std::io::Write::write_all(&mut *stream, &framed);
                    if let Err(e) = result {
                        warn!(client = id.0, error = %e, "broadcast send failed");
                    }
                }
            }
            Binding::Datagram { socket, clients, .. } => {
                let clients = clients.lock().expect("client set poisoned");
                for (id, addr) in clients.iter() {
                    if Some(*id) == exclude {
                        continue;
                    }
                    #[cfg(feature = "bytes")]
                    let result = socket.send_to(&framed.clone(), addr);
                    #[cfg(not(feature = "bytes"))]
                    let result = socket.send_to(&framed, addr);
                    if let Err(e) = result {
                        warn!(client = id.0, error = %e, "broadcast send failed");
                    }
                }
            }
        }

        Ok(())
    }

    /// Signal the running loops to exit on their next poll and empty the
    /// tracked-client set (`spec.md` §5's "resource release"). Idempotent.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        match &self.binding {
            Binding::Stream { workers, clients, .. } => {
                let mut workers = workers.lock().expect("worker pool poisoned");
                for handle in workers.drain(..) {
                    let _ = handle.join();
                }
                clients.lock().expect("client set poisoned").clear();
            }
            Binding::Datagram { clients, addr_to_id, .. } => {
                clients.lock().expect("client set poisoned").clear();
                addr_to_id.lock().expect("addr map poisoned").clear();
            }
        }
    }

    /// Run the accept loop (stream binding) or the receive loop (datagram
    /// binding). Blocks until [`Server::stop`] is called from another
    /// thread.
    pub fn run(&self) -> Result<(), Error> {
        match &self.binding {
            Binding::Stream { .. } => self.run_stream(),
            Binding::Datagram { .. } => self.run_datagram(),
        }
    }

    fn run_stream(&self) -> Result<(), Error> {
        let Binding::Stream {
            listener,
            clients,
            next_id,
            workers,
        } = &self.binding
        else {
            unreachable!("run_stream called on non-stream binding")
        };

        while !self.shutdown.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, addr)) => {
                    debug!(%addr, "accepted connection");
                    let id = ClientId(next_id.fetch_add(1, Ordering::SeqCst));
                    let handle = self.spawn_stream_worker(id, stream, Arc::clone(clients));
                    workers.lock().expect("worker pool poisoned").push(handle);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }

    fn spawn_stream_worker(
        &self,
        id: ClientId,
        stream: TcpStream,
        clients: Arc<Mutex<HashMap<ClientId, Arc<Mutex<TcpStream>>>>>,
    ) -> JoinHandle<()> {
        stream
            .set_read_timeout(Some(POLL_INTERVAL))
            .expect("setting read timeout");

        let dispatch = Arc::clone(&self.dispatch);
        let shutdown = Arc::clone(&self.shutdown);
        let max_frame_size = self.max_frame_size;
        let on_connected = self.on_connected.clone();
        let on_disconnected = self.on_disconnected.clone();

        std::thread::spawn(move || {
            let read_stream = stream.try_clone().expect("cloning client stream");
            let shared = Arc::new(Mutex::new(stream));
            clients.lock().expect("client set poisoned").insert(id, Arc::clone(&shared));

            if let Some(hook) = &on_connected {
                hook(id);
            }

            connection_worker(id, read_stream, &shared, &dispatch, &shutdown, max_frame_size);

            clients.lock().expect("client set poisoned").remove(&id);
            if let Some(hook) = &on_disconnected {
                hook(id);
            }
        })
    }

    fn run_datagram(&self) -> Result<(), Error> {
        let Binding::Datagram {
            socket,
            clients,
            addr_to_id,
            next_id,
        } = &self.binding
        else {
            unreachable!("run_datagram called on non-datagram binding")
        };

        let mut buf = vec![0u8; self.max_frame_size as usize + message::MESSAGE_ID_LEN];

        while !self.shutdown.load(Ordering::SeqCst) {
            let (n, addr) = match socket.recv_from(&mut buf) {
                Ok(v) => v,
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let id = {
                let mut addr_to_id = addr_to_id.lock().expect("addr map poisoned");
                *addr_to_id.entry(addr).or_insert_with(|| {
                    let id = ClientId(next_id.fetch_add(1, Ordering::SeqCst));
                    clients.lock().expect("client set poisoned").insert(id, addr);
                    id
                })
            };

            let payload = match validate_datagram_frame(&buf[..n], self.max_frame_size) {
                Ok(p) => p,
                Err(e) => {
                    warn!(%addr, error = %e, "malformed datagram, dropping");
                    continue;
                }
            };

            let message_id = match message::peek_message_id(payload) {
                Ok(id) => id,
                Err(e) => {
                    warn!(%addr, error = %e, "could not read message id, dropping");
                    continue;
                }
            };

            let body = &payload[message::MESSAGE_ID_LEN..];
            match self.dispatch.get(message_id) {
                Some(handler) => match handler(body, id) {
                    Ok(response_body) => {
                        let mut w = crate::codec::Writer::new();
                        ResponseHeader {
                            message_id: message_id + 1,
                            status: ResponseHeader::STATUS_OK,
                        }
                        .encode_into(&mut w);
                        w.write_bytes(&response_body);
                        let framed = message::frame_to_vec(w.as_slice());
                        if let Err(e) = socket.send_to(&framed, addr) {
                            warn!(%addr, error = %e, "sending response failed");
                        }
                    }
                    Err(e) => {
                        warn!(%addr, message_id, error = %e, "malformed request payload");
                    }
                },
                None => {
                    debug!(message_id, "dispatch miss, dropping");
                }
            }
        }

        Ok(())
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

fn connection_worker(
    id: ClientId,
    mut read: TcpStream,
    write: &Arc<Mutex<TcpStream>>,
    dispatch: &DispatchTable,
    shutdown: &AtomicBool,
    max_frame_size: u32,
) {
    while !shutdown.load(Ordering::SeqCst) {
        let payload = match read_frame(&mut read, max_frame_size) {
            Ok(p) => p,
            Err(Error::Io(kind, _))
                if kind == std::io::ErrorKind::WouldBlock || kind == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(Error::Io(kind, _))
                if kind == std::io::ErrorKind::UnexpectedEof
                    || kind == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = id.0, "connection closed by peer");
                break;
            }
            Err(e) => {
                warn!(client = id.0, error = %e, "malformed frame, tearing down connection");
                break;
            }
        };

        let message_id = match message::peek_message_id(&payload) {
            Ok(id) => id,
            Err(e) => {
                warn!(client = id.0, error = %e, "could not read message id, tearing down");
                break;
            }
        };

        let body = &payload[message::MESSAGE_ID_LEN..];
        match dispatch.get(message_id) {
            Some(handler) => match handler(body, id) {
                Ok(response_body) => {
                    let mut w = crate::codec::Writer::new();
                    ResponseHeader {
                        message_id: message_id + 1,
                        status: ResponseHeader::STATUS_OK,
                    }
                    .encode_into(&mut w);
                    w.write_bytes(&response_body);

                    let mut stream = write.lock().expect("client stream poisoned");
                    if let Err(e) = write_frame(&mut *stream, w.as_slice()) {
                        warn!(client = id.0, error = %e, "sending response failed, tearing down");
                        break;
                    }
                }
                Err(e) => {
                    warn!(client = id.0, message_id, error = %e, "malformed request payload, tearing down");
                    break;
                }
            },
            None => {
                debug!(client = id.0, message_id, "dispatch miss, dropping request");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener as StdTcpListener;
    use std::sync::Arc;

    use super::*;
    use crate::client::Client;
    use crate::codec::{Reader, Writer};
    use crate::dispatch::DispatchTable;
    use crate::{Decode, Encode};

    fn free_port() -> u16 {
        StdTcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
    }

    #[test]
    fn test_tcp_echo_round_trip() {
        let port = free_port();
        let mut dispatch = DispatchTable::new();
        dispatch.register(
            1000,
            Arc::new(|body: &[u8], _id: ClientId| -> Result<Vec<u8>, Error> {
                let mut r = Reader::new(body);
                let v = i32::decode_from(&mut r)?;
                let mut w = Writer::new();
                (v + 1000).encode_into(&mut w);
                Ok(w.into_vec())
            }),
        );

        let server = Server::bind_tcp(("127.0.0.1", port), dispatch).unwrap();
        let shutdown_handle = {
            let server = Arc::new(server);
            let server_for_thread = Arc::clone(&server);
            let handle = std::thread::spawn(move || {
                server_for_thread.run().unwrap();
            });
            (server, handle)
        };
        let (server, run_handle) = shutdown_handle;

        // Give the accept loop a moment to start listening.
        std::thread::sleep(Duration::from_millis(50));

        let client = Client::connect_tcp(("127.0.0.1", port)).unwrap();
        let result: i32 = client.call(1000, 1001, &5i32);
        assert_eq!(result, 1005);

        server.stop();
        client.stop_listening();
        let _ = run_handle.join();
    }
}
