//! Timer-driven state polling.
//!
//! A fixed-interval loop that keeps the shared [`State`] snapshot current:
//! it triggers the session's periodic queries, folds the cached status map
//! into the snapshot, reconnects dropped sessions (unless an upload holds
//! the socket), and persists the progress denominator so a bridge restart
//! mid-print can recover it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use snapbridge_core::{State, StateData};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::client::PrinterClient;

/// Called after every poll tick with the updated state handle.
pub type StatusCallback = Arc<dyn Fn(&State) + Send + Sync>;

/// Poller tunables and paths.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Tick interval.
    pub interval: Duration,
    /// Local gcode store, used to count lines for restart recovery.
    pub gcode_dir: PathBuf,
    /// Sidecar file persisting `{filename, total_lines}` across restarts.
    pub print_state_path: PathBuf,
}

impl PollerConfig {
    pub fn new(interval: Duration, gcode_dir: PathBuf, print_state_path: PathBuf) -> Self {
        Self {
            interval,
            gcode_dir,
            print_state_path,
        }
    }
}

/// Periodically polls the printer and updates the shared state.
pub struct StatePoller {
    client: PrinterClient,
    state: Arc<State>,
    config: PollerConfig,
    callback: StatusCallback,
    stop_tx: watch::Sender<bool>,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl StatePoller {
    /// Create a new poller. Call [`start`](Self::start) to begin polling.
    pub fn new(
        client: PrinterClient,
        state: Arc<State>,
        config: PollerConfig,
        callback: StatusCallback,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            client,
            state,
            config,
            callback,
            stop_tx,
            task: parking_lot::Mutex::new(None),
        }
    }

    /// Spawn the polling loop.
    pub fn start(&self) {
        let mut tick = PollTick {
            client: self.client.clone(),
            state: self.state.clone(),
            config: self.config.clone(),
            callback: self.callback.clone(),
            prev_printer_state: String::new(),
            persist_written: false,
            persist_restored: false,
        };
        let mut stop_rx = self.stop_tx.subscribe();
        let interval = self.config.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // A tick blocked on slow queries must not burst-fire afterwards.
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => tick.poll().await,
                    _ = stop_rx.changed() => return,
                }
            }
        });

        *self.task.lock() = Some(handle);
    }

    /// Halt the polling loop and wait for it to exit.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

/// Loop state carried between ticks.
struct PollTick {
    client: PrinterClient,
    state: Arc<State>,
    config: PollerConfig,
    callback: StatusCallback,
    prev_printer_state: String,
    persist_written: bool,
    persist_restored: bool,
}

impl PollTick {
    async fn poll(&mut self) {
        if !self.client.connected() {
            // An in-flight upload owns the socket; it will restore the
            // session itself. Keep reporting the last known state.
            if self.client.is_uploading() {
                return;
            }

            if !self.client.ip().is_empty() && self.client.ping().await {
                info!("printer reachable, attempting reconnect...");
                match self.client.connect().await {
                    Ok(()) => info!("reconnected to printer"),
                    Err(e) => warn!("reconnect failed: {e}"),
                }
            }

            if !self.client.connected() {
                self.state.update(|d| d.connected = false);
                (self.callback)(&self.state);
                return;
            }
        }

        // Trigger queries; results land in the session caches.
        self.client.query_temperatures().await;
        self.client.query_coordinates().await;

        // Let in-flight responses settle before reading the caches.
        tokio::time::sleep(Duration::from_millis(300)).await;

        let status = match self.client.get_status() {
            Ok(status) => status,
            Err(e) => {
                warn!("status poll error: {e}");
                return;
            }
        };

        self.state.update(|d| {
            d.connected = true;
            parse_status(&status, d);
        });

        self.recover_print_state();

        (self.callback)(&self.state);
        self.prev_printer_state = self.state.snapshot().printer_state;
    }

    /// Restart recovery for the progress denominator, plus persistence of
    /// a live print's `{filename, total_lines}` sidecar.
    fn recover_print_state(&mut self) {
        let snap = self.state.snapshot();

        // Transition away from printing (and not paused): print is over.
        if self.prev_printer_state == "printing"
            && snap.printer_state != "printing"
            && snap.printer_state != "paused"
        {
            let _ = std::fs::remove_file(&self.config.print_state_path);
            self.persist_written = false;
            self.persist_restored = false;
        }

        if snap.printer_state != "printing" || snap.print_file_name.is_empty() {
            return;
        }

        if self.client.total_lines() == 0 && !self.persist_restored {
            // Unknown denominator: try the sidecar, then the file on disk.
            match read_print_state(&self.config.print_state_path) {
                Some(ps) if ps.filename == snap.print_file_name && ps.total_lines > 0 => {
                    self.client.set_total_lines(ps.total_lines);
                    self.persist_restored = true;
                    info!(
                        "restored total_lines={} for {} from print state file",
                        ps.total_lines, ps.filename
                    );
                }
                _ => {
                    let path = self.config.gcode_dir.join(&snap.print_file_name);
                    if let Ok(data) = std::fs::read(&path) {
                        let lines = data.iter().filter(|&&b| b == b'\n').count() as u32;
                        if lines > 0 {
                            self.client.set_total_lines(lines);
                            write_print_state(
                                &self.config.print_state_path,
                                &PrintState {
                                    filename: snap.print_file_name.clone(),
                                    total_lines: lines,
                                },
                            );
                            self.persist_written = true;
                            info!(
                                "computed total_lines={} for {} from file on disk",
                                lines, snap.print_file_name
                            );
                        }
                    }
                    // Either way, stop retrying disk reads every tick.
                    self.persist_restored = true;
                }
            }
        } else if !self.persist_written && self.client.total_lines() > 0 {
            // Denominator known (e.g. from an upload) but not yet saved.
            write_print_state(
                &self.config.print_state_path,
                &PrintState {
                    filename: snap.print_file_name.clone(),
                    total_lines: self.client.total_lines(),
                },
            );
            self.persist_written = true;
        }
    }
}

/// Fold a status map from the session into the snapshot. Progress,
/// duration, fan, and filename are written unconditionally so they reset
/// once a print completes.
fn parse_status(status: &Map<String, Value>, data: &mut StateData) {
    if let Some(v) = status.get("status").and_then(Value::as_str) {
        data.printer_state = match v {
            "IDLE" => "idle".to_string(),
            "RUNNING" => "printing".to_string(),
            "PAUSED" => "paused".to_string(),
            other => other.to_string(),
        };
    }

    data.extruder0_temp = float_value(status, &["t0Temp"]);
    data.extruder0_target = float_value(status, &["t0Target"]);
    data.extruder1_temp = float_value(status, &["t1Temp"]);
    data.extruder1_target = float_value(status, &["t1Target"]);
    data.bed_temp = float_value(status, &["heatbedTemp", "bedTemp"]);
    data.bed_target = float_value(status, &["heatbedTarget", "bedTarget"]);

    data.x = float_value(status, &["x"]);
    data.y = float_value(status, &["y"]);
    data.z = float_value(status, &["z"]);

    data.print_progress = float_value(status, &["progress"]) / 100.0;

    match status.get("fileName").and_then(Value::as_str) {
        Some(name) => data.print_file_name = name.to_string(),
        None if data.printer_state == "idle" => data.print_file_name.clear(),
        None => {}
    }

    data.print_duration = float_value(status, &["elapsedTime", "printTime"]);
    data.current_line = float_value(status, &["currentLine"]) as u32;

    // The firmware reports fan speed as percent; the snapshot carries a
    // fraction.
    data.fan_speed = float_value(status, &["fanSpeed", "fan"]) / 100.0;

    let homed = status.get("homed").and_then(Value::as_bool).unwrap_or(false);
    data.homed_axes = if homed { "xyz".to_string() } else { String::new() };
}

/// Try multiple keys, return the first numeric value found.
fn float_value(status: &Map<String, Value>, keys: &[&str]) -> f64 {
    for key in keys {
        if let Some(v) = status.get(*key).and_then(Value::as_f64) {
            return v;
        }
    }
    0.0
}

/// Persisted so progress tracking can be restored if the bridge restarts
/// during a print.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PrintState {
    filename: String,
    total_lines: u32,
}

/// Read the sidecar; corrupt or absent files are treated as missing, not
/// repaired.
fn read_print_state(path: &Path) -> Option<PrintState> {
    let data = std::fs::read(path).ok()?;
    let ps: PrintState = serde_json::from_slice(&data).ok()?;
    if ps.filename.is_empty() {
        return None;
    }
    Some(ps)
}

fn write_print_state(path: &Path, ps: &PrintState) {
    match serde_json::to_vec(ps) {
        Ok(data) => {
            if let Err(e) = std::fs::write(path, data) {
                warn!("failed to write print state: {e}");
            }
        }
        Err(e) => warn!("failed to marshal print state: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn status_map(entries: &[(&str, Value)]) -> Map<String, Value> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn parse_status_maps_printer_states() {
        let mut data = StateData::default();
        parse_status(&status_map(&[("status", json!("RUNNING"))]), &mut data);
        assert_eq!(data.printer_state, "printing");

        parse_status(&status_map(&[("status", json!("PAUSED"))]), &mut data);
        assert_eq!(data.printer_state, "paused");

        parse_status(&status_map(&[("status", json!("IDLE"))]), &mut data);
        assert_eq!(data.printer_state, "idle");
    }

    #[test]
    fn parse_status_copies_numeric_fields() {
        let mut data = StateData::default();
        let status = status_map(&[
            ("status", json!("RUNNING")),
            ("t0Temp", json!(210.5)),
            ("t0Target", json!(210.0)),
            ("heatbedTemp", json!(60.1)),
            ("progress", json!(42.0)),
            ("elapsedTime", json!(1234.0)),
            ("fanSpeed", json!(50.0)),
            ("currentLine", json!(777)),
            ("fileName", json!("part.gcode")),
            ("homed", json!(true)),
            ("x", json!(10.5)),
        ]);
        parse_status(&status, &mut data);

        assert_eq!(data.extruder0_temp, 210.5);
        assert_eq!(data.bed_temp, 60.1);
        assert!((data.print_progress - 0.42).abs() < 1e-9);
        assert_eq!(data.print_duration, 1234.0);
        assert_eq!(data.fan_speed, 0.5);
        assert_eq!(data.current_line, 777);
        assert_eq!(data.print_file_name, "part.gcode");
        assert_eq!(data.homed_axes, "xyz");
        assert_eq!(data.x, 10.5);
    }

    // After a print ends the map carries zeros/empties; everything derived
    // from it must reset.
    #[test]
    fn parse_status_resets_fields_after_print() {
        let mut data = StateData {
            print_progress: 0.8,
            print_duration: 999.0,
            fan_speed: 1.0,
            print_file_name: "part.gcode".to_string(),
            ..Default::default()
        };
        let status = status_map(&[
            ("status", json!("IDLE")),
            ("progress", json!(0.0)),
            ("elapsedTime", json!(0.0)),
            ("fanSpeed", json!(0.0)),
            ("fileName", json!("")),
        ]);
        parse_status(&status, &mut data);

        assert_eq!(data.print_progress, 0.0);
        assert_eq!(data.print_duration, 0.0);
        assert_eq!(data.fan_speed, 0.0);
        assert_eq!(data.print_file_name, "");
    }

    #[test]
    fn print_state_sidecar_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("print_state.json");

        write_print_state(
            &path,
            &PrintState {
                filename: "part.gcode".to_string(),
                total_lines: 4242,
            },
        );
        let ps = read_print_state(&path).unwrap();
        assert_eq!(ps.filename, "part.gcode");
        assert_eq!(ps.total_lines, 4242);
    }

    #[test]
    fn corrupt_sidecar_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("print_state.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(read_print_state(&path).is_none());
        assert!(read_print_state(&dir.path().join("missing.json")).is_none());
    }

    fn test_tick(client: PrinterClient, state: Arc<State>, dir: &Path) -> PollTick {
        PollTick {
            client,
            state,
            config: PollerConfig::new(
                Duration::from_secs(5),
                dir.to_path_buf(),
                dir.join("print_state.json"),
            ),
            callback: Arc::new(|_| {}),
            prev_printer_state: String::new(),
            persist_written: false,
            persist_restored: false,
        }
    }

    // While an upload owns the socket the poller must neither reconnect
    // nor mark the printer disconnected.
    #[tokio::test]
    async fn poll_skips_while_uploading() {
        let dir = tempfile::tempdir().unwrap();
        let client = PrinterClient::new("127.0.0.1", "", "Snapmaker J1");
        client
            .inner
            .uploading
            .store(true, std::sync::atomic::Ordering::SeqCst);

        let state = Arc::new(State::new());
        state.update(|d| d.connected = true);

        let mut tick = test_tick(client, state.clone(), dir.path());
        tick.poll().await;

        assert!(state.snapshot().connected);
    }

    #[tokio::test]
    async fn poll_marks_disconnected_when_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        // Empty IP: no ping, no reconnect attempt.
        let client = PrinterClient::new("", "", "Snapmaker J1");

        let state = Arc::new(State::new());
        state.update(|d| d.connected = true);

        let mut tick = test_tick(client, state.clone(), dir.path());
        tick.poll().await;

        assert!(!state.snapshot().connected);
    }

    #[test]
    fn recovery_restores_total_lines_from_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let client = PrinterClient::new("", "", "Snapmaker J1");
        let state = Arc::new(State::new());
        state.update(|d| {
            d.printer_state = "printing".to_string();
            d.print_file_name = "part.gcode".to_string();
        });

        let mut tick = test_tick(client.clone(), state, dir.path());
        write_print_state(
            &tick.config.print_state_path,
            &PrintState {
                filename: "part.gcode".to_string(),
                total_lines: 1000,
            },
        );

        tick.recover_print_state();
        assert_eq!(client.total_lines(), 1000);
        assert!(tick.persist_restored);
    }

    #[test]
    fn recovery_counts_lines_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("part.gcode"), b"G28\nG1 X0\nG1 X1\n").unwrap();

        let client = PrinterClient::new("", "", "Snapmaker J1");
        let state = Arc::new(State::new());
        state.update(|d| {
            d.printer_state = "printing".to_string();
            d.print_file_name = "part.gcode".to_string();
        });

        let mut tick = test_tick(client.clone(), state, dir.path());
        tick.recover_print_state();

        assert_eq!(client.total_lines(), 3);
        // The sidecar was written for the next restart.
        assert_eq!(
            read_print_state(&tick.config.print_state_path)
                .unwrap()
                .total_lines,
            3
        );
    }

    #[test]
    fn sidecar_cleared_when_print_ends() {
        let dir = tempfile::tempdir().unwrap();
        let client = PrinterClient::new("", "", "Snapmaker J1");
        let state = Arc::new(State::new());
        state.update(|d| d.printer_state = "idle".to_string());

        let mut tick = test_tick(client, state, dir.path());
        write_print_state(
            &tick.config.print_state_path,
            &PrintState {
                filename: "part.gcode".to_string(),
                total_lines: 1000,
            },
        );
        tick.prev_printer_state = "printing".to_string();
        tick.persist_written = true;

        tick.recover_print_state();
        assert!(read_print_state(&tick.config.print_state_path).is_none());
        assert!(!tick.persist_written);
    }
}
