//! The framed inter-instance client. One client owns at most one long-lived
//! connection; requests are multiplexed over it and correlated to responses
//! by sequence number. The connection is dialed lazily on first use and never
//! re-established: once it permanently closes, the registered close handler
//! fires and the owning pool drops the client so the next build reconstructs.

use std::io::Write;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, never, select, Receiver, Sender};
use hashbrown::HashMap;

use flint::logging;

use crate::cluster::Kind;
use crate::context::Context;
use crate::errors::{LinkError, LinkResult};
use crate::transport::protocol;
use crate::transport::{read_frame, Frame};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Invoked exactly once when the client's connection is torn down for good.
pub type CloseHandler = Box<dyn Fn() + Send + Sync>;

pub struct ClientOptions {
    pub addr: String,
    pub ins_id: String,
    pub ins_kind: Kind,
    /// Applied to calls whose context carries no deadline.
    pub call_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl ClientOptions {
    pub fn new(addr: &str, ins_id: &str, ins_kind: Kind) -> ClientOptions {
        ClientOptions {
            addr: addr.to_string(),
            ins_id: ins_id.to_string(),
            ins_kind,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

// Client state the reader thread needs to outlive its Client handle.
struct Shared {
    closed: AtomicBool,
    close_handler: Mutex<Option<CloseHandler>>,
    log: logging::Logger,
}

impl Shared {
    /// Tears the connection down once: fails all pending calls, stops the
    /// reader and heartbeat threads and fires the close handler.
    fn teardown(&self, conn: &Conn) {
        if conn.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        // Dropping the senders disconnects every waiter.
        conn.pending.lock().expect("Poisoned pending lock").clear();

        let _ = conn.stream.shutdown(Shutdown::Both);

        // Wake the heartbeat thread.
        conn.close_tx
            .lock()
            .expect("Poisoned close channel lock")
            .take();

        self.closed.store(true, Ordering::Release);

        if let Some(handler) = self
            .close_handler
            .lock()
            .expect("Poisoned close handler lock")
            .take()
        {
            handler();
        }

        logging::debug!(self.log, "connection closed");
    }
}

struct Conn {
    // Shutdown handle; the reader thread owns its own clone of the stream.
    stream: TcpStream,
    writer: Mutex<TcpStream>,
    pending: Mutex<HashMap<u64, Sender<Vec<u8>>>>,
    closed: AtomicBool,
    last_egress: Mutex<Instant>,
    // Disconnects on close, waking the heartbeat thread.
    close_rx: Receiver<()>,
    close_tx: Mutex<Option<Sender<()>>>,
}

impl Conn {
    fn new(stream: TcpStream) -> LinkResult<Conn> {
        let writer = stream.try_clone()?;
        let (close_tx, close_rx) = bounded(0);

        Ok(Conn {
            stream,
            writer: Mutex::new(writer),
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            last_egress: Mutex::new(Instant::now()),
            close_rx,
            close_tx: Mutex::new(Some(close_tx)),
        })
    }

    fn write_frame(&self, frame: &[u8]) -> LinkResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LinkError::ConnectionClosed);
        }

        let mut writer = self.writer.lock().expect("Poisoned writer lock");
        writer.write_all(frame)?;

        *self.last_egress.lock().expect("Poisoned egress lock") = Instant::now();

        Ok(())
    }

    /// Registers a reply slot for `seq`. The closed flag is re-checked under
    /// the pending lock so a slot can never outlive the teardown drain.
    fn register(&self, seq: u64) -> LinkResult<Receiver<Vec<u8>>> {
        let mut pending = self.pending.lock().expect("Poisoned pending lock");

        if self.closed.load(Ordering::Acquire) {
            return Err(LinkError::ConnectionClosed);
        }

        if pending.contains_key(&seq) {
            return Err(LinkError::SeqInUse);
        }

        let (tx, rx) = bounded(1);
        pending.insert(seq, tx);

        Ok(rx)
    }

    fn unregister(&self, seq: u64) {
        self.pending
            .lock()
            .expect("Poisoned pending lock")
            .remove(&seq);
    }

    fn take_pending(&self, seq: u64) -> Option<Sender<Vec<u8>>> {
        self.pending
            .lock()
            .expect("Poisoned pending lock")
            .remove(&seq)
    }
}

/// A sequenced request/response client over one pooled connection.
pub struct Client {
    opts: ClientOptions,
    conn: Mutex<Option<Arc<Conn>>>,
    shared: Arc<Shared>,
}

impl Client {
    /// Creates the client without dialing; the connection is established on
    /// the first call or send.
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(opts: ClientOptions, log: L) -> Client {
        let client_log = match log.into() {
            Some(log) => log.new(logging::o!("addr" => opts.addr.clone())),
            _ => logging::discard(),
        };

        Client {
            opts,
            conn: Mutex::new(None),
            shared: Arc::new(Shared {
                closed: AtomicBool::new(false),
                close_handler: Mutex::new(None),
                log: client_log,
            }),
        }
    }

    /// Registers the close handler. Must be installed before the client is
    /// shared; the handler fires exactly once.
    pub fn set_close_handler(&self, handler: CloseHandler) {
        *self
            .shared
            .close_handler
            .lock()
            .expect("Poisoned close handler lock") = Some(handler);
    }

    #[inline]
    pub fn addr(&self) -> &str {
        &self.opts.addr
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Sends a request frame and blocks until the matching response arrives,
    /// the context is canceled, the deadline passes or the connection closes.
    pub fn call(&self, ctx: &Context, seq: u64, frame: Vec<u8>) -> LinkResult<Vec<u8>> {
        debug_assert!(seq != 0, "Seq 0 is reserved for fire-and-forget sends");

        ctx.check()?;

        let conn = self.ensure_conn()?;
        let slot = conn.register(seq)?;

        if let Err(err) = conn.write_frame(&frame) {
            conn.unregister(seq);
            self.shared.teardown(&conn);
            return Err(err);
        }

        let deadline = ctx
            .deadline()
            .unwrap_or_else(|| Instant::now() + self.opts.call_timeout);
        let cancel = match ctx.canceled() {
            Some(rx) => rx.clone(),
            None => never(),
        };

        select! {
            recv(slot) -> reply => match reply {
                Ok(reply) => Ok(reply),
                Err(_) => Err(LinkError::ConnectionClosed),
            },
            recv(cancel) -> _ => {
                conn.unregister(seq);
                Err(LinkError::Canceled)
            }
            default(deadline.saturating_duration_since(Instant::now())) => {
                conn.unregister(seq);
                Err(LinkError::Timeout)
            }
        }
    }

    /// Writes a fire-and-forget frame (seq 0) and returns once it is handed
    /// to the transport.
    pub fn send(&self, ctx: &Context, frame: Vec<u8>) -> LinkResult<()> {
        ctx.check()?;

        let conn = self.ensure_conn()?;

        if let Err(err) = conn.write_frame(&frame) {
            self.shared.teardown(&conn);
            return Err(err);
        }

        Ok(())
    }

    /// Closes the client. Pending calls fail with `ConnectionClosed` and the
    /// close handler fires.
    pub fn close(&self) {
        let conn = self.conn.lock().expect("Poisoned conn lock").clone();

        match conn {
            Some(conn) => self.shared.teardown(&conn),
            None => {
                self.shared.closed.store(true, Ordering::Release);

                if let Some(handler) = self
                    .shared
                    .close_handler
                    .lock()
                    .expect("Poisoned close handler lock")
                    .take()
                {
                    handler();
                }
            }
        }
    }

    fn ensure_conn(&self) -> LinkResult<Arc<Conn>> {
        if self.is_closed() {
            return Err(LinkError::ConnectionClosed);
        }

        let mut guard = self.conn.lock().expect("Poisoned conn lock");

        if let Some(conn) = guard.as_ref() {
            if conn.closed.load(Ordering::Acquire) {
                return Err(LinkError::ConnectionClosed);
            }

            return Ok(conn.clone());
        }

        let stream = TcpStream::connect(&self.opts.addr)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(self.opts.heartbeat_interval * 2))?;

        let reader_stream = stream.try_clone()?;
        let conn = Arc::new(Conn::new(stream)?);

        *guard = Some(conn.clone());
        drop(guard);

        logging::debug!(self.shared.log, "connection established";
                        "ins_id" => self.opts.ins_id.as_str(),
                        "ins_kind" => self.opts.ins_kind.as_str());

        {
            let shared = self.shared.clone();
            let conn = conn.clone();

            thread::Builder::new()
                .name(format!("crossbar-reader-{}", self.opts.addr))
                .spawn(move || run_reader(shared, conn, reader_stream))
                .expect("Error spawning reader thread");
        }

        {
            let conn = conn.clone();
            let interval = self.opts.heartbeat_interval;

            thread::Builder::new()
                .name(format!("crossbar-heartbeat-{}", self.opts.addr))
                .spawn(move || run_heartbeat(conn, interval))
                .expect("Error spawning heartbeat thread");
        }

        Ok(conn)
    }
}

fn run_reader(shared: Arc<Shared>, conn: Arc<Conn>, mut stream: TcpStream) {
    loop {
        if conn.closed.load(Ordering::Acquire) {
            break;
        }

        match read_frame(&mut stream) {
            Ok(Frame::Heartbeat) => {
                logging::trace!(shared.log, "heartbeat received");
            }
            Ok(Frame::Data(frame)) => {
                let seq = protocol::packet_seq(&frame);

                if seq == 0 {
                    logging::warn!(shared.log, "dropping unsolicited request frame";
                                   "route" => protocol::packet_route(&frame));
                    continue;
                }

                match conn.take_pending(seq) {
                    Some(slot) => drop(slot.send(frame)),
                    None => logging::warn!(shared.log, "response without waiter"; "seq" => seq),
                }
            }
            Err(err) => {
                if !conn.closed.load(Ordering::Acquire) {
                    logging::debug!(shared.log, "read failed"; "error" => %err);
                }
                break;
            }
        }
    }

    shared.teardown(&conn);
}

fn run_heartbeat(conn: Arc<Conn>, interval: Duration) {
    let close_rx = conn.close_rx.clone();

    loop {
        select! {
            // Disconnects when the connection closes.
            recv(close_rx) -> _ => break,
            default(interval) => {
                if conn.closed.load(Ordering::Acquire) {
                    break;
                }

                let idle = conn
                    .last_egress
                    .lock()
                    .expect("Poisoned egress lock")
                    .elapsed();

                if idle >= interval && conn.write_frame(&protocol::heartbeat_packet()).is_err() {
                    break;
                }
            }
        }
    }
}
