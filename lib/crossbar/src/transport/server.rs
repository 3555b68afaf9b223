//! The framed acceptor server. One per instance; decodes request frames off
//! each peer connection and dispatches them to the installed handler.
//! Requests on one connection are served in arrival order, which preserves
//! the per-connection FIFO the protocol promises.

use std::io::Write;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use flint::logging;

use crate::errors::LinkResult;
use crate::transport::client::DEFAULT_HEARTBEAT_INTERVAL;
use crate::transport::protocol;
use crate::transport::{read_frame, Dispatch, Frame, Handler};

pub struct Server {
    listener: TcpListener,
    addr: SocketAddr,
    handler: Arc<dyn Handler>,
    shutdown: Arc<AtomicBool>,
    conns: Arc<Mutex<Vec<TcpStream>>>,
    acceptor: Mutex<Option<thread::JoinHandle<()>>>,
    heartbeat_interval: Duration,
    log: logging::Logger,
}

impl Server {
    /// Binds the listener without accepting yet; `listen_addr` is valid from
    /// here on.
    pub fn bind<'a, L: Into<Option<&'a logging::Logger>>>(
        addr: &str,
        handler: Arc<dyn Handler>,
        log: L,
    ) -> LinkResult<Server> {
        let listener = TcpListener::bind(addr)?;
        let addr = listener.local_addr()?;

        let server_log = match log.into() {
            Some(log) => log.new(logging::o!("listen" => addr.to_string())),
            _ => logging::discard(),
        };

        Ok(Server {
            listener,
            addr,
            handler,
            shutdown: Arc::new(AtomicBool::new(false)),
            conns: Arc::new(Mutex::new(Vec::new())),
            acceptor: Mutex::new(None),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            log: server_log,
        })
    }

    #[inline]
    pub fn listen_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Overrides the heartbeat interval applied to connections accepted from
    /// here on. Call before `start`.
    pub fn set_heartbeat_interval(&mut self, interval: Duration) {
        self.heartbeat_interval = interval;
    }

    /// Starts the accept loop. Each accepted connection is served by its own
    /// thread until the peer disconnects or the server stops.
    pub fn start(&self) {
        let listener = self.listener.try_clone().expect("Error cloning listener");
        let handler = self.handler.clone();
        let shutdown = self.shutdown.clone();
        let conns = self.conns.clone();
        let heartbeat_interval = self.heartbeat_interval;
        let log = self.log.clone();

        logging::info!(log, "transporter server started");

        let acceptor = thread::Builder::new()
            .name("crossbar-acceptor".to_string())
            .spawn(move || {
                for incoming in listener.incoming() {
                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    match incoming {
                        Ok(stream) => {
                            let peer = stream
                                .peer_addr()
                                .map(|addr| addr.to_string())
                                .unwrap_or_default();

                            if let Ok(clone) = stream.try_clone() {
                                conns.lock().expect("Poisoned conns lock").push(clone);
                            }

                            let handler = handler.clone();
                            let shutdown = shutdown.clone();
                            let conn_log = log.new(logging::o!("peer" => peer));

                            let _ = thread::Builder::new()
                                .name("crossbar-server-conn".to_string())
                                .spawn(move || {
                                    run_conn(handler, stream, shutdown, heartbeat_interval, conn_log)
                                });
                        }
                        Err(err) => {
                            if shutdown.load(Ordering::Acquire) {
                                break;
                            }

                            logging::warn!(log, "accept failed"; "error" => %err);
                        }
                    }
                }
            })
            .expect("Error spawning acceptor thread");

        *self.acceptor.lock().expect("Poisoned acceptor lock") = Some(acceptor);
    }

    /// Stops accepting and tears down every live connection.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);

        // Wake the acceptor with a throwaway connection.
        let _ = TcpStream::connect(("127.0.0.1", self.addr.port()));

        if let Some(acceptor) = self
            .acceptor
            .lock()
            .expect("Poisoned acceptor lock")
            .take()
        {
            let _ = acceptor.join();
        }

        for stream in self.conns.lock().expect("Poisoned conns lock").drain(..) {
            let _ = stream.shutdown(Shutdown::Both);
        }

        logging::info!(self.log, "transporter server stopped");
    }
}

fn run_conn(
    handler: Arc<dyn Handler>,
    mut stream: TcpStream,
    shutdown: Arc<AtomicBool>,
    heartbeat_interval: Duration,
    log: logging::Logger,
) {
    if stream.set_read_timeout(Some(heartbeat_interval * 2)).is_err() {
        return;
    }
    let _ = stream.set_nodelay(true);

    let mut writer = match stream.try_clone() {
        Ok(writer) => writer,
        Err(_) => return,
    };

    logging::debug!(log, "peer connected");

    loop {
        if shutdown.load(Ordering::Acquire) {
            break;
        }

        match read_frame(&mut stream) {
            Ok(Frame::Heartbeat) => {
                // Echo so an idle peer observes liveness both ways.
                if writer.write_all(&protocol::heartbeat_packet()).is_err() {
                    break;
                }
            }
            Ok(Frame::Data(frame)) => {
                let route = protocol::packet_route(&frame);
                let seq = protocol::packet_seq(&frame);

                match handler.handle(&frame, route, seq) {
                    Dispatch::Reply(res) => {
                        if writer.write_all(&res).is_err() {
                            break;
                        }
                    }
                    Dispatch::Silent => (),
                    // An unknown route drops the frame, not the connection.
                    Dispatch::Unknown => {
                        logging::warn!(log, "dropping frame for unknown route"; "route" => route)
                    }
                }
            }
            Err(err) => {
                logging::debug!(log, "peer disconnected"; "error" => %err);
                break;
            }
        }
    }

    let _ = stream.shutdown(Shutdown::Both);
}
