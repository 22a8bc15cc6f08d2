//! Printer session.
//!
//! Wraps one SACP connection to a printer: handshake, subscription setup,
//! cached telemetry, command execution, and reconnect. All writes to the
//! socket are serialized through the writer lock; all reads belong to the
//! packet router. Telemetry pushed by the printer lands in a cache guarded
//! by its own lock and is assembled into a status map on demand.

use bytes::{BufMut, BytesMut};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Map, Value};
use snapbridge_core::{Error, Result, SessionError};
use snapbridge_sacp::{
    next_sequence, packet::read_packet, parse_bed_info, parse_coordinate_info, parse_current_line,
    parse_extruder_info, parse_fan_info, parse_file_info, parse_heartbeat, parse_print_time,
    parse_printing_file_info, put_string, BedZoneData, CoordinateData, ExtruderData, FanData,
    MachineStatus, Packet, ATTRIBUTE_REQUEST, PORT, RECEIVER_CONTROLLER, RECEIVER_SCREEN,
};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{tcp::OwnedWriteHalf, TcpStream};
use tokio::time;
use tracing::{debug, info, warn};

use crate::router::{DisconnectHandler, PacketRouter, SubscriptionHandler};

/// Identifier sent in the handshake; the printer shows it on the
/// touchscreen's connected-clients list.
const CLIENT_IDENTIFIER: &str = "Moonraker Remote Control";

/// Default per-request deadline.
pub(crate) const SACP_TIMEOUT: Duration = Duration::from_secs(10);

/// TCP probe deadline used by the poller's reachability check.
const PING_TIMEOUT: Duration = Duration::from_secs(3);

/// Subscription push interval requested from the firmware, in ms.
const SUBSCRIPTION_INTERVAL_MS: u16 = 2000;

/// Tunables for a printer session.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// SACP TCP port.
    pub port: u16,
    /// Deadline for TCP connect + handshake.
    pub connect_timeout: Duration,
    /// Post-upload reconnect attempts. The firmware sometimes refuses the
    /// first connection after an upload; these were tuned empirically.
    pub upload_reconnect_attempts: u32,
    /// Base delay between reconnect attempts (scales linearly).
    pub upload_reconnect_delay: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            port: PORT,
            connect_timeout: Duration::from_secs(10),
            upload_reconnect_attempts: 5,
            upload_reconnect_delay: Duration::from_secs(1),
        }
    }
}

/// Telemetry pushed by the printer, merged per record identity. Mutated
/// only by the router's subscription callback under the cache lock.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionState {
    pub(crate) extruders: Vec<ExtruderData>,
    pub(crate) bed_zones: Vec<BedZoneData>,
    pub(crate) machine_status: MachineStatus,
    pub(crate) current_line: u32,
    /// Elapsed print seconds.
    pub(crate) print_time: u32,
    pub(crate) print_filename: String,
    pub(crate) fans: Vec<FanData>,
    pub(crate) coordinates: CoordinateData,
}

pub(crate) struct ClientInner {
    pub(crate) ip: String,
    pub(crate) token: String,
    pub(crate) model: String,
    pub(crate) options: ClientOptions,

    /// Connection write half. The lock doubles as the write mutex: held
    /// across exactly one encode-and-write window.
    pub(crate) writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    pub(crate) router: Mutex<Option<Arc<PacketRouter>>>,
    pub(crate) connected: AtomicBool,
    pub(crate) sub: RwLock<SubscriptionState>,
    pub(crate) uploading: AtomicBool,
    pub(crate) total_lines: AtomicU32,
}

/// A SACP client session for one printer.
///
/// Cheap to clone; all clones share the same session.
#[derive(Clone)]
pub struct PrinterClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl PrinterClient {
    /// Create a new printer client. The token is accepted for config
    /// compatibility; SACP does not use it.
    pub fn new(ip: impl Into<String>, token: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_options(ip, token, model, ClientOptions::default())
    }

    /// Create a client with explicit tunables.
    pub fn with_options(
        ip: impl Into<String>,
        token: impl Into<String>,
        model: impl Into<String>,
        options: ClientOptions,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                ip: ip.into(),
                token: token.into(),
                model: model.into(),
                options,
                writer: tokio::sync::Mutex::new(None),
                router: Mutex::new(None),
                connected: AtomicBool::new(false),
                sub: RwLock::new(SubscriptionState::default()),
                uploading: AtomicBool::new(false),
                total_lines: AtomicU32::new(0),
            }),
        }
    }

    /// The printer's IP address.
    pub fn ip(&self) -> &str {
        &self.inner.ip
    }

    /// The configured authentication token (unused by SACP).
    pub fn token(&self) -> &str {
        &self.inner.token
    }

    /// The printer model string.
    pub fn model(&self) -> &str {
        &self.inner.model
    }

    /// True while a SACP connection is active.
    pub fn connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// True while an upload holds the connection. Gates the poller's
    /// reconnect logic.
    pub fn is_uploading(&self) -> bool {
        self.inner.uploading.load(Ordering::SeqCst)
    }

    /// Line count of the file being printed (progress denominator).
    pub fn total_lines(&self) -> u32 {
        self.inner.total_lines.load(Ordering::SeqCst)
    }

    /// Set the progress denominator (from an upload or restart recovery).
    pub fn set_total_lines(&self, lines: u32) {
        self.inner.total_lines.store(lines, Ordering::SeqCst);
    }

    /// Establish the SACP connection, start the packet router, and kick
    /// off subscription setup in the background.
    pub async fn connect(&self) -> Result<()> {
        // Clean up any existing connection first.
        if self.connected() {
            self.disconnect().await;
        }

        let stream = self.handshake().await?;
        let (read_half, write_half) = stream.into_split();

        *self.inner.writer.lock().await = Some(write_half);

        let weak = Arc::downgrade(&self.inner);
        let on_subscription: SubscriptionHandler = Arc::new(move |set, id, data| {
            if let Some(inner) = weak.upgrade() {
                PrinterClient { inner }.handle_push(set, id, data);
            }
        });
        let weak = Arc::downgrade(&self.inner);
        let on_disconnect: DisconnectHandler = Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                PrinterClient { inner }.handle_disconnect();
            }
        });

        let router = PacketRouter::start(read_half, on_subscription, on_disconnect);
        *self.inner.router.lock() = Some(router);
        self.inner.connected.store(true, Ordering::SeqCst);

        info!(
            "connected to printer at {}:{} via SACP",
            self.inner.ip, self.inner.options.port
        );

        let client = self.clone();
        tokio::spawn(async move {
            client.setup_subscriptions().await;
        });

        Ok(())
    }

    /// Dial the printer and complete the SACP hello exchange. The exchange
    /// runs on the intact stream; the split into router-owned halves
    /// happens after.
    async fn handshake(&self) -> Result<TcpStream> {
        let timeout = self.inner.options.connect_timeout;
        let addr = format!("{}:{}", self.inner.ip, self.inner.options.port);

        let mut stream = time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| timed_out("connect timed out"))??;

        let mut data = BytesMut::new();
        put_string(&mut data, CLIENT_IDENTIFIER);
        data.put_u16_le(0);
        data.put_u16_le(0);

        let hello = Packet {
            receiver_id: RECEIVER_SCREEN,
            sequence: 1,
            command_set: 0x01,
            command_id: 0x05,
            data: data.to_vec(),
            ..Default::default()
        };
        time::timeout(timeout, stream.write_all(&hello.encode()))
            .await
            .map_err(|_| timed_out("handshake write timed out"))??;

        // The printer may front-run the hello ack with telemetry; read
        // until the matching command arrives.
        loop {
            let packet = read_packet(&mut stream, timeout).await?;
            if packet.command_set == 0x01 && packet.command_id == 0x05 {
                break;
            }
        }

        Ok(stream)
    }

    /// Subscribe to data feeds and run initial queries after connect.
    async fn setup_subscriptions(&self) {
        self.query_temperatures().await;

        let feeds: [(u8, u8, &str); 4] = [
            (0x01, 0xA0, "heartbeat"),
            (0xAC, 0xA0, "current line"),
            (0xAC, 0xA5, "print time"),
            (0x10, 0xA3, "fan info"),
        ];
        for (set, id, name) in feeds {
            match self.subscribe_to(set, id, SUBSCRIPTION_INTERVAL_MS).await {
                Ok(()) => debug!("subscribed to {name}"),
                Err(e) => warn!("subscribe {name} (0x{set:02x}/0x{id:02x}) failed: {e}"),
            }
        }

        self.query_coordinates().await;
    }

    /// Ask the printer to push `target` frames at the given interval, via
    /// the generic subscription mechanism (0x01/0x00).
    async fn subscribe_to(&self, target_set: u8, target_id: u8, interval_ms: u16) -> Result<()> {
        let data = vec![
            target_set,
            target_id,
            (interval_ms & 0xFF) as u8,
            (interval_ms >> 8) as u8,
        ];
        self.send_command(0x01, 0x00, data).await
    }

    /// One-shot temperature queries for extruder and bed. Results land in
    /// the telemetry cache; failures are logged, not returned.
    pub async fn query_temperatures(&self) {
        if let Err(e) = self.send_query(0x10, 0xA0).await {
            warn!("extruder query failed: {e}");
        }
        if let Err(e) = self.send_query(0x14, 0xA0).await {
            warn!("bed query failed: {e}");
        }
    }

    /// One-shot coordinate query (0x01/0x30). Without a periodic refresh
    /// the cached position goes stale; the poller calls this every tick.
    pub async fn query_coordinates(&self) {
        let result: Result<()> = async {
            let router = self.router()?;
            let (seq, rx) = self
                .issue_registered(&router, RECEIVER_CONTROLLER, 0x01, 0x30, Vec::new())
                .await?;
            let resp = router.await_response(seq, rx, SACP_TIMEOUT).await?;
            if resp.data.len() > 4 {
                self.handle_push(0x01, 0x30, &resp.data);
            }
            Ok(())
        }
        .await;

        if let Err(e) = result {
            warn!("coordinate query failed: {e}");
        }
    }

    /// Issue a query whose results the J1S embeds directly in the ack
    /// rather than a separate push.
    async fn send_query(&self, command_set: u8, command_id: u8) -> Result<()> {
        let router = self.router()?;

        let mut data = BytesMut::new();
        data.put_u16_le(1000); // interval; may be ignored by the firmware

        let (seq, rx) = self
            .issue_registered(&router, RECEIVER_CONTROLLER, command_set, command_id, data.to_vec())
            .await?;
        let resp = router.await_response(seq, rx, SACP_TIMEOUT).await?;

        if resp.data.len() > 1 {
            self.handle_push(command_set, command_id, &resp.data);
        }
        Ok(())
    }

    /// Query current print file info: basic info from the controller
    /// (0xAC/0x00), then total lines from the screen (0xAC/0x1A).
    async fn query_file_info(&self) {
        let result: Result<()> = async {
            let router = self.router()?;
            let (seq, rx) = self
                .issue_registered(&router, RECEIVER_CONTROLLER, 0xAC, 0x00, Vec::new())
                .await?;
            let resp = router.await_response(seq, rx, SACP_TIMEOUT).await?;

            if resp.data.len() > 1 {
                match parse_file_info(&resp.data) {
                    Some(info) => {
                        info!("print file: {}", info.filename);
                        self.inner.sub.write().print_filename = info.filename;
                    }
                    None => warn!("file info parse error (data={:02x?})", resp.data),
                }
            }
            Ok(())
        }
        .await;

        if let Err(e) = result {
            warn!("file info query failed: {e}");
            return;
        }

        self.query_printing_file_info().await;
    }

    /// Extended file info lives on the screen MCU and is not always
    /// available; a short deadline keeps the heartbeat path snappy.
    async fn query_printing_file_info(&self) {
        let result: Result<()> = async {
            let router = self.router()?;
            let (seq, rx) = self
                .issue_registered(&router, RECEIVER_SCREEN, 0xAC, 0x1A, Vec::new())
                .await?;
            let resp = router
                .await_response(seq, rx, Duration::from_secs(3))
                .await?;

            if resp.data.len() > 1 {
                match parse_printing_file_info(&resp.data) {
                    Some(fi) => {
                        info!(
                            "print details: file={} total_lines={} est_time={}s",
                            fi.filename, fi.total_lines, fi.estimated_time
                        );
                        let mut sub = self.inner.sub.write();
                        if !fi.filename.is_empty() {
                            sub.print_filename = fi.filename;
                        }
                        drop(sub);
                        self.set_total_lines(fi.total_lines);
                    }
                    None => warn!("printing file info parse error (data={:02x?})", resp.data),
                }
            }
            Ok(())
        }
        .await;

        if let Err(e) = result {
            debug!("printing file info not available (screen query): {e}");
        }
    }

    /// Route subscription/query data into the telemetry caches. Handlers
    /// are idempotent: the firmware may repeat pushes.
    pub(crate) fn handle_push(&self, command_set: u8, command_id: u8, data: &[u8]) {
        match (command_set, command_id) {
            (0x10, 0xA0) => {
                let extruders = parse_extruder_info(data);
                if !extruders.is_empty() {
                    let mut sub = self.inner.sub.write();
                    for e in extruders {
                        match sub.extruders.iter_mut().find(|x| x.head_id == e.head_id) {
                            Some(existing) => *existing = e,
                            None => sub.extruders.push(e),
                        }
                    }
                }
            }
            (0x14, 0xA0) => {
                let zones = parse_bed_info(data);
                if !zones.is_empty() {
                    self.inner.sub.write().bed_zones = zones;
                }
            }
            (0x01, 0xA0) => self.handle_heartbeat(data),
            (0xAC, 0xA0) => {
                if let Some(line) = parse_current_line(data) {
                    self.inner.sub.write().current_line = line;
                }
            }
            (0xAC, 0xA5) => {
                if let Some(secs) = parse_print_time(data) {
                    self.inner.sub.write().print_time = secs;
                }
            }
            (0x10, 0xA3) => {
                let fans = parse_fan_info(data);
                if !fans.is_empty() {
                    let mut sub = self.inner.sub.write();
                    for f in fans {
                        match sub
                            .fans
                            .iter_mut()
                            .find(|x| x.head_id == f.head_id && x.fan_index == f.fan_index)
                        {
                            Some(existing) => *existing = f,
                            None => sub.fans.push(f),
                        }
                    }
                }
            }
            (0x01, 0x30) => {
                if let Some(cd) = parse_coordinate_info(data) {
                    self.inner.sub.write().coordinates = cd;
                } else {
                    warn!("coordinate parse error (data={:02x?})", data);
                }
            }
            // The firmware emits records outside the documented set.
            _ => debug!("unhandled push 0x{command_set:02x}/0x{command_id:02x} ({} bytes)", data.len()),
        }
    }

    fn handle_heartbeat(&self, data: &[u8]) {
        let Some(status) = parse_heartbeat(data) else {
            warn!("heartbeat parse error (data={:02x?})", data);
            return;
        };

        let prev = {
            let mut sub = self.inner.sub.write();
            let prev = sub.machine_status;
            sub.machine_status = status;
            prev
        };

        if status != prev {
            info!("machine status: {prev} -> {status}");
        }

        // A print just started: find out what is printing.
        if status.is_print_active() && !prev.is_print_active() {
            let client = self.clone();
            tokio::spawn(async move {
                client.query_file_info().await;
            });
        }

        if status.clears_print_data() {
            let mut sub = self.inner.sub.write();
            sub.print_filename.clear();
            sub.current_line = 0;
            sub.print_time = 0;
            drop(sub);
            self.set_total_lines(0);
        }
    }

    /// Called by the router when the connection breaks unexpectedly.
    fn handle_disconnect(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.router.lock().take();
        self.clear_caches();

        let client = self.clone();
        tokio::spawn(async move {
            client.inner.writer.lock().await.take();
        });

        warn!("printer connection lost");
    }

    /// Drop any existing connection and establish a new one.
    pub async fn reconnect(&self) -> Result<()> {
        info!("reconnecting to printer at {}...", self.inner.ip);
        self.disconnect().await;
        self.connect().await
    }

    /// Close the SACP connection: stop the router, send the protocol
    /// goodbye best-effort, and clear cached telemetry.
    pub async fn disconnect(&self) {
        let router = self.inner.router.lock().take();
        if let Some(router) = router {
            router.stop().await;
        }

        if let Some(mut writer) = self.inner.writer.lock().await.take() {
            let goodbye = Packet {
                receiver_id: RECEIVER_SCREEN,
                sequence: 1,
                command_set: 0x01,
                command_id: 0x06,
                ..Default::default()
            };
            let _ = time::timeout(SACP_TIMEOUT, writer.write_all(&goodbye.encode())).await;
            let _ = writer.shutdown().await;
        }

        self.inner.connected.store(false, Ordering::SeqCst);
        self.clear_caches();
    }

    pub(crate) fn clear_caches(&self) {
        *self.inner.sub.write() = SubscriptionState::default();
        self.set_total_lines(0);
    }

    /// TCP reachability probe without a SACP exchange.
    pub async fn ping(&self) -> bool {
        let addr = format!("{}:{}", self.inner.ip, self.inner.options.port);
        matches!(
            time::timeout(PING_TIMEOUT, TcpStream::connect(&addr)).await,
            Ok(Ok(_))
        )
    }

    /// Serialize one request onto the socket and return its sequence.
    /// Fire-and-forget: no response waiter is registered.
    ///
    /// The writer lock is held only across the encode-and-write window;
    /// the sequence is allocated inside it.
    pub(crate) async fn issue(
        &self,
        receiver_id: u8,
        command_set: u8,
        command_id: u8,
        data: Vec<u8>,
    ) -> Result<u16> {
        let mut guard = self.inner.writer.lock().await;
        let writer = guard.as_mut().ok_or(SessionError::NotConnected)?;

        let sequence = next_sequence();
        let packet = Packet {
            receiver_id,
            sender_id: 0,
            attribute: ATTRIBUTE_REQUEST,
            sequence,
            command_set,
            command_id,
            data,
        };
        time::timeout(SACP_TIMEOUT, writer.write_all(&packet.encode()))
            .await
            .map_err(|_| timed_out("write timed out"))??;

        Ok(sequence)
    }

    /// Serialize one request and register its response waiter with the
    /// router before the bytes leave, still inside the write-lock window.
    /// The registration is withdrawn if the write fails.
    async fn issue_registered(
        &self,
        router: &PacketRouter,
        receiver_id: u8,
        command_set: u8,
        command_id: u8,
        data: Vec<u8>,
    ) -> Result<(u16, tokio::sync::oneshot::Receiver<Packet>)> {
        let mut guard = self.inner.writer.lock().await;
        let writer = guard.as_mut().ok_or(SessionError::NotConnected)?;

        let sequence = next_sequence();
        let rx = router.register(sequence);
        let packet = Packet {
            receiver_id,
            sender_id: 0,
            attribute: ATTRIBUTE_REQUEST,
            sequence,
            command_set,
            command_id,
            data,
        };
        match time::timeout(SACP_TIMEOUT, writer.write_all(&packet.encode())).await {
            Ok(Ok(())) => Ok((sequence, rx)),
            Ok(Err(e)) => {
                router.unregister(sequence);
                Err(e.into())
            }
            Err(_) => {
                router.unregister(sequence);
                Err(timed_out("write timed out"))
            }
        }
    }

    fn router(&self) -> Result<Arc<PacketRouter>> {
        self.inner
            .router
            .lock()
            .clone()
            .ok_or_else(|| SessionError::NotConnected.into())
    }

    /// Send a command to the controller and check its acknowledgement.
    async fn send_command(&self, command_set: u8, command_id: u8, data: Vec<u8>) -> Result<()> {
        let router = self.router()?;
        let (seq, rx) = self
            .issue_registered(&router, RECEIVER_CONTROLLER, command_set, command_id, data)
            .await?;
        let resp = router.await_response(seq, rx, SACP_TIMEOUT).await?;

        match resp.data.first() {
            None | Some(0) => Ok(()),
            Some(&code) => Err(SessionError::CommandFailed {
                command_set,
                command_id,
                code,
            }
            .into()),
        }
    }

    /// Home all axes.
    pub async fn home(&self) -> Result<()> {
        self.send_command(0x01, 0x35, vec![0x00]).await
    }

    /// Set an extruder's target temperature.
    pub async fn set_tool_temperature(&self, tool_id: u8, temperature: u16) -> Result<()> {
        let mut data = BytesMut::new();
        data.put_u8(0x08);
        data.put_u8(tool_id);
        data.put_u16_le(temperature);
        self.send_command(0x10, 0x02, data.to_vec()).await
    }

    /// Set a heated bed zone's target temperature.
    pub async fn set_bed_temperature(&self, zone_id: u8, temperature: u16) -> Result<()> {
        let mut data = BytesMut::new();
        data.put_u8(0x05);
        data.put_u8(zone_id);
        data.put_u16_le(temperature);
        self.send_command(0x14, 0x02, data.to_vec()).await
    }

    /// Execute a GCode line and return the response string.
    ///
    /// Result code 15 is treated as success: the firmware reports it for
    /// motion commands it accepts without a textual response.
    pub async fn execute_gcode(&self, gcode: &str) -> Result<String> {
        let router = self.router()?;

        let mut data = BytesMut::new();
        put_string(&mut data, gcode);

        let (seq, rx) = self
            .issue_registered(&router, RECEIVER_CONTROLLER, 0x01, 0x02, data.to_vec())
            .await?;
        let resp = router.await_response(seq, rx, SACP_TIMEOUT).await?;

        match resp.data.first() {
            None => Ok(String::new()),
            Some(0) | Some(15) => Ok(String::from_utf8_lossy(&resp.data[1..]).into_owned()),
            Some(&code) => Err(SessionError::CommandFailed {
                command_set: 0x01,
                command_id: 0x02,
                code,
            }
            .into()),
        }
    }

    /// Stop the current print (0xAC/0x06). Fire-and-forget: once printing,
    /// the firmware streams state pushes and the ack gets routed as
    /// subscription noise, so the write succeeding is the success signal.
    /// The next heartbeat carries the ground truth.
    pub async fn stop_print(&self) -> Result<()> {
        self.issue(RECEIVER_CONTROLLER, 0xAC, 0x06, Vec::new())
            .await
            .map(|_| ())
    }

    /// Pause the current print (0xAC/0x04). Fire-and-forget like
    /// [`stop_print`](Self::stop_print).
    pub async fn pause_print(&self) -> Result<()> {
        self.issue(RECEIVER_CONTROLLER, 0xAC, 0x04, Vec::new())
            .await
            .map(|_| ())
    }

    /// Resume a paused print (0xAC/0x05). Fire-and-forget like
    /// [`stop_print`](Self::stop_print).
    pub async fn resume_print(&self) -> Result<()> {
        self.issue(RECEIVER_CONTROLLER, 0xAC, 0x05, Vec::new())
            .await
            .map(|_| ())
    }

    /// Assemble the current printer status from cached telemetry.
    pub fn get_status(&self) -> Result<Map<String, Value>> {
        if !self.connected() {
            return Err(SessionError::NotConnected.into());
        }

        let sub = self.inner.sub.read();

        let status = match sub.machine_status {
            MachineStatus::Idle | MachineStatus::Completed | MachineStatus::Stopped => "IDLE",
            MachineStatus::Printing
            | MachineStatus::Starting
            | MachineStatus::Finishing
            | MachineStatus::Resuming
            | MachineStatus::Stopping => "RUNNING",
            MachineStatus::Paused | MachineStatus::Pausing | MachineStatus::Recovering => "PAUSED",
            MachineStatus::Unknown(_) => "IDLE",
        };

        let total_lines = self.total_lines();
        let mut progress = 0.0;
        if total_lines > 0 {
            progress = (sub.current_line as f64 / total_lines as f64 * 100.0).min(100.0);
        }

        // Part fan is fan type 0; speed normalizes from 0-255 to percent.
        let fan_speed = sub
            .fans
            .iter()
            .find(|f| f.fan_type == 0)
            .map(|f| f.speed as f64 / 255.0 * 100.0)
            .unwrap_or(0.0);

        let mut result = Map::new();
        result.insert("status".into(), json!(status));
        result.insert("progress".into(), json!(progress));
        result.insert("elapsedTime".into(), json!(sub.print_time as f64));
        result.insert("fileName".into(), json!(sub.print_filename));
        result.insert("currentLine".into(), json!(sub.current_line));
        result.insert("x".into(), json!(sub.coordinates.x));
        result.insert("y".into(), json!(sub.coordinates.y));
        result.insert("z".into(), json!(sub.coordinates.z));
        result.insert("fanSpeed".into(), json!(fan_speed));
        result.insert("homed".into(), json!(sub.coordinates.homed));

        for e in &sub.extruders {
            match e.head_id {
                0 => {
                    result.insert("t0Temp".into(), json!(e.current_temp));
                    result.insert("t0Target".into(), json!(e.target_temp));
                }
                1 => {
                    result.insert("t1Temp".into(), json!(e.current_temp));
                    result.insert("t1Target".into(), json!(e.target_temp));
                }
                _ => {}
            }
        }

        for zone in &sub.bed_zones {
            if zone.index == 0 {
                result.insert("heatbedTemp".into(), json!(zone.current_temp));
                result.insert("heatbedTarget".into(), json!(zone.target_temp));
            }
        }

        Ok(result)
    }
}

pub(crate) fn timed_out(context: &str) -> Error {
    Error::Io(io::Error::new(io::ErrorKind::TimedOut, context.to_string()))
}
