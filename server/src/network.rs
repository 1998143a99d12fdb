//! Connection multiplexer
//!
//! One dedicated OS thread runs a current-thread tokio runtime and owns
//! every client socket. Sockets are non-blocking and registered with the
//! runtime's readiness driver (epoll/kqueue), and each connection is a
//! local task on that single thread which waits for read or write
//! readiness and then drives its [`Session`] one incremental step.
//!
//! Decoded requests never run on this thread. They are handed to the
//! worker pool, and the response comes back through the connection's
//! [`Outbox`], which wakes the connection task.

use crate::dispatcher::{ConnectionContext, Dispatcher};
use crate::session::{Outbox, ReadProgress, Session, WriteProgress};
use log::{debug, error, info, warn};
use shared::{encode, Message};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tokio::io::Interest;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::{Builder, Handle};
use tokio::sync::watch;
use tokio::task::LocalSet;

/// Adapts a tokio socket to `std::io` for the session state machine.
/// Every call is a single non-blocking attempt.
struct SocketIo<'a>(&'a TcpStream);

impl Read for SocketIo<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.try_read(buf)
    }
}

impl Write for SocketIo<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.try_write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct Multiplexer {
    listener: std::net::TcpListener,
    dispatcher: Arc<Dispatcher>,
    workers: Handle,
    max_payload: u32,
    shutdown: watch::Receiver<bool>,
    next_id: Arc<AtomicU64>,
}

impl Multiplexer {
    /// `listener` must already be bound. `workers` is the runtime whose
    /// blocking pool executes requests.
    pub fn new(
        listener: std::net::TcpListener,
        dispatcher: Arc<Dispatcher>,
        workers: Handle,
        max_payload: u32,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            listener,
            dispatcher,
            workers,
            max_payload,
            shutdown,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Starts the event loop on its own thread.
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("multiplexer".to_string())
            .spawn(move || {
                if let Err(e) = self.run() {
                    error!("Multiplexer stopped: {}", e);
                }
            })
    }

    fn run(self) -> io::Result<()> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let local = LocalSet::new();
        local.block_on(&runtime, self.accept_loop())
    }

    async fn accept_loop(mut self) -> io::Result<()> {
        self.listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(self.listener.try_clone()?)?;
        info!("Accepting connections on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.open_connection(stream, peer),
                    Err(e) => warn!("Failed to accept connection: {}", e),
                },
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        info!("Multiplexer shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }

    fn open_connection(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle for {}: {}", peer, e);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        info!("Connection {} opened from {}", id, peer);

        let outbox = Arc::new(Outbox::new());
        let connection = Connection {
            session: Session::new(id, self.max_payload),
            context: Arc::new(Mutex::new(ConnectionContext::new(id, Arc::downgrade(&outbox)))),
            outbox,
            stream,
            dispatcher: Arc::clone(&self.dispatcher),
            workers: self.workers.clone(),
        };
        tokio::task::spawn_local(connection.serve());
    }
}

/// One accepted client, owned by its local task.
struct Connection {
    session: Session,
    context: Arc<Mutex<ConnectionContext>>,
    outbox: Arc<Outbox>,
    stream: TcpStream,
    dispatcher: Arc<Dispatcher>,
    workers: Handle,
}

impl Connection {
    async fn serve(mut self) {
        while !self.session.is_disconnected() {
            let wants_read = self.session.wants_read(&self.outbox);
            let wants_write = self.session.wants_write(&self.outbox);

            let interest = match (wants_read, wants_write) {
                (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
                (true, false) => Some(Interest::READABLE),
                (false, true) => Some(Interest::WRITABLE),
                (false, false) => None,
            };

            let Some(interest) = interest else {
                // A request is in flight and nothing is queued.
                self.outbox.notified().await;
                continue;
            };

            tokio::select! {
                ready = self.stream.ready(interest) => match ready {
                    Ok(ready) => {
                        if ready.is_readable() && wants_read {
                            self.on_readable();
                        }
                        if ready.is_writable() && wants_write && !self.session.is_disconnected() {
                            self.on_writable();
                        }
                    }
                    Err(e) => {
                        debug!("Connection {} readiness error: {}", self.session.id(), e);
                        self.session.disconnect();
                    }
                },
                _ = self.outbox.notified() => {}
            }
        }

        self.close();
    }

    fn on_readable(&mut self) {
        let progress = self.session.read_step(&mut SocketIo(&self.stream));
        if progress != ReadProgress::Ready {
            return;
        }
        if let Some(message) = self.session.take_message() {
            self.dispatch(message);
        }
    }

    fn on_writable(&mut self) {
        let progress = self
            .session
            .write_step(&self.outbox, &mut SocketIo(&self.stream));
        if progress == WriteProgress::Disconnected {
            debug!("Connection {} failed while writing", self.session.id());
        }
    }

    fn dispatch(&self, message: Message) {
        self.outbox.begin_request();

        let dispatcher = Arc::clone(&self.dispatcher);
        let context = Arc::clone(&self.context);
        let outbox = Arc::clone(&self.outbox);
        self.workers.spawn_blocking(move || {
            let response = dispatcher.handle(&context, message);
            let frame = match encode(&response) {
                Ok(frame) => Some(frame),
                Err(e) => {
                    error!("Failed to encode {}: {}", response.kind(), e);
                    encode(&Message::error("[ERROR] internal server error")).ok()
                }
            };
            outbox.complete_request(frame);
        });
    }

    fn close(self) {
        let id = self.session.id();
        self.outbox.close();

        let dispatcher = self.dispatcher;
        let context = self.context;
        self.workers
            .spawn_blocking(move || dispatcher.disconnect(&context));
        info!("Connection {} closed", id);
    }
}
