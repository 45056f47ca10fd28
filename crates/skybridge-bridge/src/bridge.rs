use std::io::{Read, Write};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use skybridge_frame::{Heartbeat, ParseOutcome, Parser, ProtocolMessage};
use skybridge_transport::{bind_udp, is_timeout, EventSink, SerialConfig, SerialLink};
use tracing::{debug, info, warn};

use crate::endpoints::{
    EndpointTable, RemoteEndpoint, TouchOutcome, DEFAULT_ENDPOINT_TIMEOUT, DEFAULT_MAX_ENDPOINTS,
};
use crate::error::{BridgeError, Result};
use crate::event::BridgeEvent;
use crate::stats::{BridgeStats, Counters, LinkState};
use crate::vehicle::{VehicleLink, VehicleStatus, DEFAULT_VEHICLE_TIMEOUT};

/// Standard ground-control telemetry port.
pub const DEFAULT_TELEMETRY_PORT: u16 = 14550;

/// Largest UDP payload; datagrams are forwarded whole.
const MAX_DATAGRAM_LEN: usize = 65_507;

const SERIAL_CHUNK_LEN: usize = 256;

/// Bridge settings, fixed for the life of a `Bridge`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub bind_addr: SocketAddr,
    pub max_endpoints: usize,
    pub endpoint_timeout: Duration,
    pub vehicle_timeout: Duration,
    /// How often stale ground stations are swept.
    pub sweep_interval: Duration,
    /// Receive timeout on the UDP socket; bounds shutdown latency.
    pub poll_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_TELEMETRY_PORT)),
            max_endpoints: DEFAULT_MAX_ENDPOINTS,
            endpoint_timeout: DEFAULT_ENDPOINT_TIMEOUT,
            vehicle_timeout: DEFAULT_VEHICLE_TIMEOUT,
            sweep_interval: Duration::from_secs(5),
            poll_timeout: Duration::from_millis(10),
        }
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_endpoints == 0 {
            return Err(BridgeError::InvalidConfig(
                "max_endpoints must be at least 1".into(),
            ));
        }
        if self.poll_timeout.is_zero() {
            return Err(BridgeError::InvalidConfig(
                "poll_timeout must be non-zero".into(),
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(BridgeError::InvalidConfig(
                "sweep_interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

struct Shared {
    socket: UdpSocket,
    endpoints: Mutex<EndpointTable>,
    vehicle: Mutex<VehicleLink>,
    serial_tx: Mutex<Box<dyn Write + Send>>,
    counters: Counters,
    running: AtomicBool,
    events: EventSink<BridgeEvent>,
    started_at: Instant,
    config: BridgeConfig,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn on_vehicle_message(&self, message: &ProtocolMessage) {
        Counters::add(&self.counters.messages_received, 1);

        if let Some(heartbeat) = Heartbeat::from_message(message) {
            let detected = lock(&self.vehicle).record(
                message.system_id,
                message.component_id,
                heartbeat,
                Instant::now(),
            );
            if detected {
                info!(
                    system_id = message.system_id,
                    component_id = message.component_id,
                    vehicle_type = heartbeat.vehicle_type,
                    autopilot = heartbeat.autopilot,
                    "vehicle detected"
                );
                self.events.emit(BridgeEvent::VehicleDetected {
                    system_id: message.system_id,
                    component_id: message.component_id,
                    heartbeat,
                });
            }
        }

        if self.broadcast(message.raw()) > 0 {
            Counters::add(&self.counters.messages_forwarded, 1);
        }
    }

    /// Best-effort send to every known endpoint. Returns how many accepted it.
    fn broadcast(&self, bytes: &[u8]) -> usize {
        let targets = lock(&self.endpoints).addrs();
        if targets.is_empty() {
            return 0;
        }

        let mut delivered = Vec::with_capacity(targets.len());
        for addr in targets {
            match self.socket.send_to(bytes, addr) {
                Ok(sent) => {
                    Counters::add(&self.counters.udp_tx_bytes, sent as u64);
                    delivered.push(addr);
                }
                Err(err) => debug!(%addr, error = %err, "udp send failed"),
            }
        }

        lock(&self.endpoints).record_sent(&delivered);
        delivered.len()
    }

    fn write_serial(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut tx = lock(&self.serial_tx);
        tx.write_all(bytes)?;
        tx.flush()?;
        Counters::add(&self.counters.serial_tx_bytes, bytes.len() as u64);
        Ok(())
    }

    fn sweep(&self, now: Instant) {
        let evicted = lock(&self.endpoints).sweep(now);
        for addr in evicted {
            info!(%addr, "ground station timed out");
            self.events.emit(BridgeEvent::PeerDisconnected(addr));
        }
    }

    fn check_vehicle(&self, now: Instant) {
        let lost = lock(&self.vehicle).check_lost(now);
        if let Some(status) = lost {
            warn!(system_id = status.system_id, "vehicle heartbeat lost");
            self.events.emit(BridgeEvent::VehicleLost {
                system_id: status.system_id,
                component_id: status.component_id,
            });
        }
    }

    fn state(&self) -> LinkState {
        if !self.is_running() {
            return LinkState::Stopped;
        }
        let now = Instant::now();
        if lock(&self.endpoints).is_any_fresh(now) {
            LinkState::GroundStationConnected
        } else if lock(&self.vehicle).is_connected(now) {
            LinkState::VehicleConnected
        } else {
            LinkState::Running
        }
    }

    fn stats(&self) -> BridgeStats {
        let endpoints = lock(&self.endpoints).len();
        let uptime_ms = self.started_at.elapsed().as_millis() as u64;
        self.counters.snapshot(self.state(), endpoints, uptime_ms)
    }
}

fn serial_loop<R: Read>(shared: &Shared, mut reader: R) {
    let mut parser = Parser::new();
    let mut chunk = [0u8; SERIAL_CHUNK_LEN];
    let mut last_sweep = Instant::now();
    let mut closed = false;

    while shared.is_running() {
        match reader.read(&mut chunk) {
            Ok(0) => {
                if !closed {
                    warn!("serial link closed");
                    closed = true;
                }
                thread::sleep(shared.config.poll_timeout);
            }
            Ok(n) => {
                closed = false;
                Counters::add(&shared.counters.serial_rx_bytes, n as u64);
                for &byte in &chunk[..n] {
                    match parser.feed(byte) {
                        ParseOutcome::Complete(message) => shared.on_vehicle_message(&message),
                        ParseOutcome::BadChecksum => {
                            Counters::add(&shared.counters.parse_errors, 1);
                        }
                        ParseOutcome::Incomplete => {}
                    }
                }
            }
            Err(err) if is_timeout(&err) => {}
            Err(err) => {
                warn!(error = %err, "serial read failed");
                thread::sleep(shared.config.poll_timeout);
            }
        }

        let now = Instant::now();
        if now.duration_since(last_sweep) >= shared.config.sweep_interval {
            shared.sweep(now);
            last_sweep = now;
        }
        shared.check_vehicle(now);
    }
    debug!("serial loop exited");
}

fn udp_loop(shared: &Shared) {
    let mut buf = vec![0u8; MAX_DATAGRAM_LEN];

    while shared.is_running() {
        let (len, from) = match shared.socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(err) if is_timeout(&err) => continue,
            Err(err) => {
                warn!(error = %err, "udp receive failed");
                thread::sleep(shared.config.poll_timeout);
                continue;
            }
        };

        Counters::add(&shared.counters.udp_rx_bytes, len as u64);
        Counters::add(&shared.counters.datagrams_received, 1);

        let outcome = lock(&shared.endpoints).touch(from, Instant::now());
        match outcome {
            TouchOutcome::Inserted => {
                info!(addr = %from, "ground station connected");
                shared.events.emit(BridgeEvent::PeerConnected(from));
            }
            TouchOutcome::Full => debug!(addr = %from, "endpoint table full, not tracking sender"),
            TouchOutcome::Refreshed => {}
        }

        if let Err(err) = shared.write_serial(&buf[..len]) {
            warn!(error = %err, "serial write failed");
        }
    }
    debug!("udp loop exited");
}

/// Bidirectional serial/UDP telemetry bridge.
///
/// Verified frames from the serial side are broadcast to every ground station
/// that has sent a datagram recently; datagrams are written to the serial
/// side verbatim.
pub struct Bridge {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl Bridge {
    /// Start forwarding between a serial byte stream and a UDP socket.
    ///
    /// `reader` must time out periodically (like a `SerialLink`) so the serial
    /// loop notices `stop()`.
    pub fn start<R, W>(
        reader: R,
        writer: W,
        config: BridgeConfig,
        events: EventSink<BridgeEvent>,
    ) -> Result<Self>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        config.validate()?;
        let socket = bind_udp(config.bind_addr, config.poll_timeout)?;
        let local_addr = socket.local_addr()?;

        let shared = Arc::new(Shared {
            socket,
            endpoints: Mutex::new(EndpointTable::new(
                config.max_endpoints,
                config.endpoint_timeout,
            )),
            vehicle: Mutex::new(VehicleLink::new(config.vehicle_timeout)),
            serial_tx: Mutex::new(Box::new(writer)),
            counters: Counters::default(),
            running: AtomicBool::new(true),
            events,
            started_at: Instant::now(),
            config,
        });

        let mut bridge = Self {
            shared: Arc::clone(&shared),
            workers: Vec::with_capacity(2),
            local_addr,
        };

        let serial_shared = Arc::clone(&shared);
        let serial = thread::Builder::new()
            .name("bridge-serial".into())
            .spawn(move || serial_loop(&serial_shared, reader))?;
        bridge.workers.push(serial);

        let udp_shared = shared;
        let udp = thread::Builder::new()
            .name("bridge-udp".into())
            .spawn(move || udp_loop(&udp_shared))?;
        bridge.workers.push(udp);

        info!(addr = %local_addr, "bridge started");
        Ok(bridge)
    }

    /// Open the serial device and start a bridge on it.
    pub fn open(
        serial: &SerialConfig,
        config: BridgeConfig,
        events: EventSink<BridgeEvent>,
    ) -> Result<Self> {
        let reader = SerialLink::open(serial)?;
        let writer = reader.try_clone()?;
        Self::start(reader, writer, config, events)
    }

    /// Stop both loops, release the socket and return the final counters.
    pub fn stop(mut self) -> BridgeStats {
        self.shutdown();
        self.shared.stats()
    }

    fn shutdown(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("bridge worker panicked");
            }
        }
    }

    /// True when any ground station has been heard from within the timeout.
    pub fn is_far_side_connected(&self) -> bool {
        lock(&self.shared.endpoints).is_any_fresh(Instant::now())
    }

    pub fn vehicle_connected(&self) -> bool {
        lock(&self.shared.vehicle).is_connected(Instant::now())
    }

    /// Last beacon from the vehicle, if one was ever seen.
    pub fn heartbeat(&self) -> Option<VehicleStatus> {
        lock(&self.shared.vehicle).status()
    }

    pub fn endpoints(&self) -> Vec<RemoteEndpoint> {
        lock(&self.shared.endpoints).snapshot()
    }

    pub fn stats(&self) -> BridgeStats {
        self.shared.stats()
    }

    pub fn state(&self) -> LinkState {
        self.shared.state()
    }

    /// Write bytes to the vehicle as if a ground station had sent them.
    pub fn send_to_vehicle(&self, bytes: &[u8]) -> Result<()> {
        self.shared.write_serial(bytes).map_err(BridgeError::Io)
    }

    /// Broadcast bytes to every known ground station.
    pub fn send_to_endpoints(&self, bytes: &[u8]) -> usize {
        self.shared.broadcast(bytes)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("local_addr", &self.local_addr)
            .field("state", &self.state())
            .finish()
    }
}
