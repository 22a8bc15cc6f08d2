//! Single-reader packet routing.
//!
//! SACP interleaves command acknowledgements with subscription pushes on
//! one TCP connection. A per-caller read loop would either steal
//! subscription data or deadlock, so exactly one task owns the read half
//! and demultiplexes by sequence number: frames matching a pending waiter
//! are delivered to it, everything else goes to the subscription handler.

use parking_lot::Mutex;
use snapbridge_core::{Error, Result, SessionError};
use snapbridge_sacp::{packet::read_packet, Packet};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, warn};

/// Idle deadline per read. Expiry is transparent: the loop re-checks the
/// stop flag and reads again.
const READ_DEADLINE: Duration = Duration::from_secs(5);

/// Called when subscription or otherwise unsolicited data arrives.
pub type SubscriptionHandler = Arc<dyn Fn(u8, u8, &[u8]) + Send + Sync>;

/// Called when the connection breaks unexpectedly.
pub type DisconnectHandler = Arc<dyn Fn() + Send + Sync>;

type PendingMap = Arc<Mutex<HashMap<u16, oneshot::Sender<Packet>>>>;

/// Reads all incoming SACP packets from the printer connection and routes
/// them: command responses to waiting callers, everything else to the
/// subscription handler.
pub struct PacketRouter {
    pending: PendingMap,
    stopped: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<OwnedReadHalf>>>,
}

impl PacketRouter {
    /// Spawn the background read loop over the given read half.
    pub fn start(
        read_half: OwnedReadHalf,
        on_subscription: SubscriptionHandler,
        on_disconnect: DisconnectHandler,
    ) -> Arc<Self> {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let stopped = Arc::new(AtomicBool::new(false));

        let handle = tokio::spawn(read_loop(
            read_half,
            pending.clone(),
            stopped.clone(),
            on_subscription,
            on_disconnect,
        ));

        Arc::new(Self {
            pending,
            stopped,
            reader: Mutex::new(Some(handle)),
        })
    }

    /// Register a waiter for `sequence`. Callers register *before* the
    /// request hits the socket - otherwise a fast response can race the
    /// registration and get misrouted as subscription data.
    ///
    /// Delivery is single-shot; registering the same sequence twice is a
    /// caller bug (the older waiter is dropped).
    pub fn register(&self, sequence: u16) -> oneshot::Receiver<Packet> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(sequence, tx);
        rx
    }

    /// Withdraw a registration whose request never made it out.
    pub fn unregister(&self, sequence: u16) {
        self.pending.lock().remove(&sequence);
    }

    /// Block on a registered waiter until the response arrives or the
    /// deadline passes.
    pub async fn await_response(
        &self,
        sequence: u16,
        rx: oneshot::Receiver<Packet>,
        timeout: Duration,
    ) -> Result<Packet> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(packet)) => Ok(packet),
            // Sender dropped: the read loop exited and drained the map.
            Ok(Err(_)) => Err(SessionError::ConnectionClosed.into()),
            Err(_) => {
                self.unregister(sequence);
                Err(SessionError::ResponseTimeout { seq: sequence }.into())
            }
        }
    }

    /// Register and block in one step.
    pub async fn wait_for_response(&self, sequence: u16, timeout: Duration) -> Result<Packet> {
        let rx = self.register(sequence);
        self.await_response(sequence, rx, timeout).await
    }

    /// Shut the read loop down and reclaim the read half. Blocks until the
    /// loop exits; every pending waiter is drained with a closed error
    /// first. Returns `None` if the router was already stopped.
    pub async fn stop(&self) -> Option<OwnedReadHalf> {
        self.stopped.store(true, Ordering::SeqCst);
        let handle = self.reader.lock().take()?;
        handle.await.ok()
    }

    /// Whether the read loop has been told to stop.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

async fn read_loop(
    mut read_half: OwnedReadHalf,
    pending: PendingMap,
    stopped: Arc<AtomicBool>,
    on_subscription: SubscriptionHandler,
    on_disconnect: DisconnectHandler,
) -> OwnedReadHalf {
    loop {
        if stopped.load(Ordering::SeqCst) {
            break;
        }

        match read_packet(&mut read_half, READ_DEADLINE).await {
            Ok(packet) => {
                let waiter = pending.lock().remove(&packet.sequence);
                match waiter {
                    Some(tx) => {
                        // The receiver may have timed out in the meantime;
                        // the frame is then an orphan and is dropped.
                        let _ = tx.send(packet);
                    }
                    None => on_subscription(packet.command_set, packet.command_id, &packet.data),
                }
            }
            Err(err) if err.is_timeout() => continue,
            Err(Error::Protocol(err)) => {
                // The firmware occasionally garbles a frame; only a broken
                // transport tears the session down.
                warn!("dropping malformed frame: {err}");
            }
            Err(err) => {
                if !stopped.load(Ordering::SeqCst) {
                    error!("packet router read error: {err}");
                    on_disconnect();
                }
                break;
            }
        }
    }

    // Dropping the senders fails every outstanding wait_for_response with
    // a connection-closed error.
    pending.lock().clear();
    read_half
}
