use std::io::{ErrorKind, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;
use skybridge_transport::{bind_tcp, tune_stream, EventSink, StreamTuning};
use tracing::{debug, info, warn};

use crate::error::{Result, StreamError};
use crate::event::StreamEvent;
use crate::http::{
    part_header, read_request_line, DeadlineReader, RequestError, BAD_REQUEST, PART_TRAILER,
    SERVICE_UNAVAILABLE, STREAM_HEADER,
};
use crate::latest::FrameSubscriber;
use crate::slots::{ClientInfo, ClientSlots, ClientState, SlotGuard, DEFAULT_MAX_CLIENTS};

/// Default stream port.
pub const DEFAULT_STREAM_PORT: u16 = 8080;

/// Stream server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub bind_addr: SocketAddr,
    pub max_clients: usize,
    /// Sleep between frame-availability checks and accept polls.
    pub poll_interval: Duration,
    /// Total time a new connection may take to send its request line.
    pub request_timeout: Duration,
    pub tuning: StreamTuning,
    /// Per-client throughput is logged this often.
    pub stats_interval: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_STREAM_PORT)),
            max_clients: DEFAULT_MAX_CLIENTS,
            poll_interval: Duration::from_millis(10),
            request_timeout: Duration::from_secs(2),
            tuning: StreamTuning::default(),
            stats_interval: Duration::from_secs(5),
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_clients == 0 {
            return Err(StreamError::InvalidConfig(
                "max_clients must be at least 1".into(),
            ));
        }
        if self.poll_interval.is_zero() || self.request_timeout.is_zero() {
            return Err(StreamError::InvalidConfig(
                "poll_interval and request_timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Server-wide counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    pub active_clients: usize,
    pub total_accepted: u64,
    pub rejected: u64,
    pub bad_requests: u64,
    pub frames_sent: u64,
    pub bytes_sent: u64,
}

#[derive(Default)]
struct Counters {
    accepted: AtomicU64,
    rejected: AtomicU64,
    bad_requests: AtomicU64,
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
}

struct Shared {
    running: AtomicBool,
    subscriber: FrameSubscriber,
    slots: ClientSlots,
    config: StreamConfig,
    counters: Counters,
    events: EventSink<StreamEvent>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn stats(&self) -> StreamStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StreamStats {
            active_clients: self.slots.active(),
            total_accepted: load(&self.counters.accepted),
            rejected: load(&self.counters.rejected),
            bad_requests: load(&self.counters.bad_requests),
            frames_sent: load(&self.counters.frames_sent),
            bytes_sent: load(&self.counters.bytes_sent),
        }
    }

    fn reap_workers(&self, wait: bool) {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        let mut live = Vec::with_capacity(workers.len());
        for worker in workers.drain(..) {
            if wait || worker.is_finished() {
                if worker.join().is_err() {
                    warn!("stream client worker panicked");
                }
            } else {
                live.push(worker);
            }
        }
        *workers = live;
    }
}

/// Multipart MJPEG server fed from a latest-frame buffer.
///
/// Every viewer gets its own thread and is served at its own pace; viewers
/// beyond `max_clients` are turned away with a 503.
pub struct StreamServer {
    shared: Arc<Shared>,
    accept: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl StreamServer {
    pub fn start(
        config: StreamConfig,
        subscriber: FrameSubscriber,
        events: EventSink<StreamEvent>,
    ) -> Result<Self> {
        config.validate()?;
        let listener = bind_tcp(config.bind_addr)?;
        let local_addr = listener.local_addr()?;

        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            subscriber,
            slots: ClientSlots::new(config.max_clients, events.clone()),
            config,
            counters: Counters::default(),
            events,
            workers: Mutex::new(Vec::new()),
        });

        let accept_shared = Arc::clone(&shared);
        let accept = thread::Builder::new()
            .name("stream-accept".into())
            .spawn(move || accept_loop(&accept_shared, listener))?;

        info!(addr = %local_addr, max_clients = shared.config.max_clients, "stream server started");
        Ok(Self {
            shared,
            accept: Some(accept),
            local_addr,
        })
    }

    /// Stop accepting, end every session and release the listening socket.
    pub fn stop(mut self) -> StreamStats {
        self.shutdown();
        self.shared.stats()
    }

    fn shutdown(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(accept) = self.accept.take() {
            if accept.join().is_err() {
                warn!("stream accept loop panicked");
            }
        }
    }

    pub fn active_clients(&self) -> usize {
        self.shared.slots.active()
    }

    /// End the session of viewer `id`. Returns false when no such viewer is
    /// connected.
    ///
    /// The viewer's worker notices within one poll interval, or once a write
    /// in progress finishes.
    pub fn disconnect_client(&self, id: u32) -> bool {
        let found = self.shared.slots.cancel(id);
        if found {
            info!(client = id, "disconnecting stream client");
        }
        found
    }

    pub fn clients(&self) -> Vec<ClientInfo> {
        self.shared.slots.snapshot()
    }

    pub fn stats(&self) -> StreamStats {
        self.shared.stats()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for StreamServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for StreamServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamServer")
            .field("local_addr", &self.local_addr)
            .field("active_clients", &self.active_clients())
            .finish()
    }
}

fn accept_loop(shared: &Arc<Shared>, listener: TcpListener) {
    while shared.is_running() {
        match listener.accept() {
            Ok((stream, addr)) => handle_connection(shared, stream, addr),
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                thread::sleep(shared.config.poll_interval);
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => {
                warn!(error = %err, "accept failed");
                thread::sleep(shared.config.poll_interval);
            }
        }
        shared.reap_workers(false);
    }

    drop(listener);
    shared.reap_workers(true);
    debug!("stream accept loop exited");
}

fn handle_connection(shared: &Arc<Shared>, mut stream: TcpStream, addr: SocketAddr) {
    // accepted sockets inherit non-blocking mode on some platforms
    if let Err(err) = stream.set_nonblocking(false) {
        warn!(%addr, error = %err, "could not configure client socket");
        return;
    }

    let deadline = Instant::now() + shared.config.request_timeout;
    let request = match read_request_line(&mut DeadlineReader::new(&stream, deadline)) {
        Ok(request) => request,
        Err(RequestError::NoRequest) => {
            debug!(%addr, "client sent no request");
            return;
        }
        Err(RequestError::Malformed) => {
            shared.counters.bad_requests.fetch_add(1, Ordering::Relaxed);
            let _ = stream.write_all(BAD_REQUEST);
            return;
        }
    };
    if request.method != "GET" {
        debug!(%addr, method = %request.method, "unsupported method");
        shared.counters.bad_requests.fetch_add(1, Ordering::Relaxed);
        let _ = stream.write_all(BAD_REQUEST);
        return;
    }

    let Some(guard) = shared.slots.claim(addr) else {
        warn!(%addr, "stream server full, rejecting client");
        shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
        shared.events.emit(StreamEvent::ClientRejected { addr });
        let _ = stream.write_all(SERVICE_UNAVAILABLE);
        let _ = stream.shutdown(Shutdown::Both);
        return;
    };
    shared.counters.accepted.fetch_add(1, Ordering::Relaxed);

    if let Err(err) = tune_stream(&stream, &shared.config.tuning) {
        warn!(client = guard.id(), error = %err, "socket tuning failed");
    }

    let worker_shared = Arc::clone(shared);
    let spawned = thread::Builder::new()
        .name(format!("stream-client-{}", guard.id()))
        .spawn(move || client_session(&worker_shared, stream, guard));
    match spawned {
        Ok(handle) => shared
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle),
        // the guard went down with the closure and freed the slot
        Err(err) => warn!(%addr, error = %err, "could not spawn client worker"),
    }
}

fn client_session(shared: &Shared, mut stream: TcpStream, guard: SlotGuard) {
    match serve_client(shared, &mut stream, &guard) {
        Ok(()) if guard.is_cancelled() => debug!(client = guard.id(), "session cancelled"),
        Ok(()) => debug!(client = guard.id(), "session ended by shutdown"),
        Err(err) => debug!(client = guard.id(), error = %err, "session ended"),
    }
    guard.set_state(ClientState::Closed);
    let _ = stream.shutdown(Shutdown::Both);
}

fn serve_client(shared: &Shared, stream: &mut TcpStream, guard: &SlotGuard) -> std::io::Result<()> {
    stream.write_all(STREAM_HEADER)?;
    guard.set_state(ClientState::HeaderSent);

    let mut frame = Vec::with_capacity(shared.subscriber.capacity());
    let mut last_sequence = 0u64;
    let mut window_start = Instant::now();
    let mut window_frames = 0u32;

    while shared.is_running() && !guard.is_cancelled() {
        let Some(info) = shared.subscriber.read_into(last_sequence, &mut frame) else {
            thread::sleep(shared.config.poll_interval);
            continue;
        };

        let header = part_header(info.format.mime(), frame.len());
        stream.write_all(header.as_bytes())?;
        stream.write_all(&frame)?;
        stream.write_all(PART_TRAILER)?;

        if last_sequence == 0 {
            guard.set_state(ClientState::Streaming);
        }
        last_sequence = info.sequence;

        let written = header.len() + frame.len() + PART_TRAILER.len();
        guard.record_frame(written);
        shared.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
        shared
            .counters
            .bytes_sent
            .fetch_add(written as u64, Ordering::Relaxed);

        window_frames += 1;
        let elapsed = window_start.elapsed();
        if elapsed >= shared.config.stats_interval {
            let fps = f64::from(window_frames) / elapsed.as_secs_f64();
            info!(client = guard.id(), fps, "stream client throughput");
            window_start = Instant::now();
            window_frames = 0;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Read};
    use std::sync::mpsc::Receiver;

    use skybridge_transport::event_channel;

    use super::*;
    use crate::latest::{frame_buffer, FrameBufferConfig, FramePublisher, PixelFormat};

    struct Harness {
        server: StreamServer,
        publisher: FramePublisher,
        events: Receiver<StreamEvent>,
    }

    fn start(max_clients: usize) -> Harness {
        let (publisher, subscriber) = frame_buffer(FrameBufferConfig::default());
        let (sink, events) = event_channel();
        let config = StreamConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            max_clients,
            request_timeout: Duration::from_millis(300),
            ..StreamConfig::default()
        };
        let server = StreamServer::start(config, subscriber, sink).unwrap();
        Harness {
            server,
            publisher,
            events,
        }
    }

    fn connect(addr: SocketAddr, request: &[u8]) -> BufReader<TcpStream> {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(3)))
            .unwrap();
        stream.write_all(request).unwrap();
        BufReader::new(stream)
    }

    /// Read up to and including the blank line ending a header block.
    fn read_head(reader: &mut BufReader<TcpStream>) -> String {
        let mut head = String::new();
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).unwrap() == 0 {
                break;
            }
            head.push_str(&line);
            if line == "\r\n" {
                break;
            }
        }
        head
    }

    fn read_part(reader: &mut BufReader<TcpStream>) -> Vec<u8> {
        let head = read_head(reader);
        assert!(head.starts_with("--frame\r\n"), "unexpected part head: {head:?}");
        let len: usize = head
            .lines()
            .find_map(|l| l.strip_prefix("Content-Length: "))
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let mut body = vec![0u8; len + 2];
        reader.read_exact(&mut body).unwrap();
        assert_eq!(&body[len..], b"\r\n");
        body.truncate(len);
        body
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    const GET: &[u8] = b"GET / HTTP/1.1\r\nHost: cam\r\n\r\n";

    #[test]
    fn streams_published_frames() {
        let mut h = start(2);
        let mut client = connect(h.server.local_addr(), GET);

        let head = read_head(&mut client);
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains("multipart/x-mixed-replace;boundary=frame"));

        h.publisher.publish(b"\xFF\xD8first\xFF\xD9", 320, 240, PixelFormat::Jpeg);
        assert_eq!(read_part(&mut client), b"\xFF\xD8first\xFF\xD9");

        h.publisher.publish(b"second", 320, 240, PixelFormat::Jpeg);
        assert_eq!(read_part(&mut client), b"second");

        assert!(wait_until(Duration::from_secs(2), || {
            h.server.clients().first().map(|c| c.frames_sent) == Some(2)
        }));
        let clients = h.server.clients();
        assert_eq!(clients[0].state, ClientState::Streaming);
        assert!(matches!(
            h.events.try_recv(),
            Ok(StreamEvent::ClientConnected { .. })
        ));
    }

    #[test]
    fn full_server_answers_503_and_frees_on_disconnect() {
        let h = start(1);
        let addr = h.server.local_addr();

        let mut first = connect(addr, GET);
        read_head(&mut first);
        assert!(wait_until(Duration::from_secs(2), || h.server.active_clients() == 1));

        let mut second = connect(addr, GET);
        let mut response = Vec::new();
        second.read_to_end(&mut response).unwrap();
        assert_eq!(response, SERVICE_UNAVAILABLE);
        assert_eq!(h.server.active_clients(), 1);
        assert_eq!(h.server.stats().rejected, 1);

        // the slot frees once a write to the departed viewer fails
        drop(first);
        let mut publisher = h.publisher;
        assert!(wait_until(Duration::from_secs(5), || {
            publisher.publish(&[0u8; 4096], 1, 1, PixelFormat::Jpeg);
            h.server.active_clients() == 0
        }));

        let mut third = connect(addr, GET);
        assert!(read_head(&mut third).starts_with("HTTP/1.1 200 OK"));
        assert!(wait_until(Duration::from_secs(2), || h.server.active_clients() == 1));

        let events: Vec<_> = h.events.try_iter().collect();
        assert!(events.iter().any(|e| matches!(e, StreamEvent::ClientRejected { .. })));
        assert!(events.iter().any(|e| matches!(e, StreamEvent::ClientDisconnected { .. })));
    }

    #[test]
    fn non_get_gets_400() {
        let h = start(1);
        let mut client = connect(h.server.local_addr(), b"POST / HTTP/1.1\r\n\r\n");
        let mut response = Vec::new();
        client.read_to_end(&mut response).unwrap();
        assert_eq!(response, BAD_REQUEST);
        assert_eq!(h.server.stats().bad_requests, 1);
        assert_eq!(h.server.active_clients(), 0);
    }

    #[test]
    fn silent_client_is_dropped() {
        let h = start(1);
        let mut client = connect(h.server.local_addr(), b"");
        let mut response = Vec::new();
        client.read_to_end(&mut response).unwrap();
        assert!(response.is_empty());
        assert_eq!(h.server.stats().total_accepted, 0);
    }

    #[test]
    fn stop_ends_sessions_and_releases_port() {
        let h = start(2);
        let addr = h.server.local_addr();
        let mut client = connect(addr, GET);
        read_head(&mut client);
        assert!(wait_until(Duration::from_secs(2), || h.server.active_clients() == 1));

        let stats = h.server.stop();
        assert_eq!(stats.active_clients, 0);
        assert_eq!(stats.total_accepted, 1);

        let mut rest = Vec::new();
        let _ = client.read_to_end(&mut rest);
        TcpListener::bind(addr).expect("port should be free after stop");
    }

    #[test]
    fn trickling_client_does_not_hold_accept_loop() {
        let h = start(2);
        let addr = h.server.local_addr();
        let trickler = thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            for _ in 0..20 {
                if stream.write_all(b"G").is_err() {
                    break;
                }
                thread::sleep(Duration::from_millis(100));
            }
        });
        thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        let mut client = connect(addr, GET);
        assert!(read_head(&mut client).starts_with("HTTP/1.1 200 OK"));
        assert!(
            started.elapsed() < Duration::from_millis(1500),
            "viewer waited {:?}",
            started.elapsed()
        );
        assert_eq!(h.server.stats().total_accepted, 1);

        trickler.join().unwrap();
    }

    #[test]
    fn disconnect_client_ends_one_session() {
        let h = start(2);
        let addr = h.server.local_addr();
        let mut kept = connect(addr, GET);
        read_head(&mut kept);
        assert!(wait_until(Duration::from_secs(2), || h.server.active_clients() == 1));
        let kept_id = h.server.clients()[0].id;

        let mut dropped = connect(addr, GET);
        read_head(&mut dropped);
        assert!(wait_until(Duration::from_secs(2), || h.server.active_clients() == 2));
        let dropped_id = h
            .server
            .clients()
            .iter()
            .map(|c| c.id)
            .find(|&id| id != kept_id)
            .unwrap();

        let expected = StreamEvent::ClientDisconnected {
            id: dropped_id,
            addr: dropped.get_ref().local_addr().unwrap(),
        };

        assert!(h.server.disconnect_client(dropped_id));
        let mut rest = Vec::new();
        let _ = dropped.read_to_end(&mut rest);
        let mut events = Vec::new();
        assert!(wait_until(Duration::from_secs(2), || {
            events.extend(h.events.try_iter());
            events.contains(&expected)
        }));
        assert_eq!(h.server.active_clients(), 1);
        assert_eq!(h.server.clients()[0].id, kept_id);
        assert!(!h.server.disconnect_client(dropped_id));
    }

    #[test]
    fn rejects_zero_clients() {
        let (_p, subscriber) = frame_buffer(FrameBufferConfig::default());
        let config = StreamConfig {
            max_clients: 0,
            ..StreamConfig::default()
        };
        let err = StreamServer::start(config, subscriber, EventSink::disabled()).unwrap_err();
        assert!(matches!(err, StreamError::InvalidConfig(_)));
    }
}
