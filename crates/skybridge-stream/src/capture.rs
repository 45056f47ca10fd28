use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Result, StreamError};
use crate::latest::{FramePublisher, PixelFormat, PublishOutcome};

/// One frame handed over by a sensor driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    pub data: Vec<u8>,
    pub width: u16,
    pub height: u16,
    pub format: PixelFormat,
}

/// A sensor, or anything standing in for one.
///
/// `next_frame` blocks until a frame is ready. `Ok(None)` means the source is
/// exhausted and the producer should stop.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<CapturedFrame>>;
}

/// Producer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    pub captured: u64,
    pub published: u64,
    /// Dropped because a reader held the buffer.
    pub skipped: u64,
    /// Dropped because they exceed the buffer capacity.
    pub oversized: u64,
    pub failures: u64,
}

#[derive(Default)]
struct Counters {
    captured: AtomicU64,
    published: AtomicU64,
    skipped: AtomicU64,
    oversized: AtomicU64,
    failures: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> CaptureStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        CaptureStats {
            captured: load(&self.captured),
            published: load(&self.published),
            skipped: load(&self.skipped),
            oversized: load(&self.oversized),
            failures: load(&self.failures),
        }
    }
}

/// Pause after a failed capture before asking again.
const FAILURE_BACKOFF: Duration = Duration::from_millis(100);

/// Runs a [`FrameSource`] on its own thread and publishes every frame.
pub struct CaptureProducer {
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    worker: Option<JoinHandle<()>>,
}

impl CaptureProducer {
    pub fn spawn<S>(source: S, publisher: FramePublisher, stats_interval: Duration) -> Result<Self>
    where
        S: FrameSource + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(Counters::default());

        let worker_running = Arc::clone(&running);
        let worker_counters = Arc::clone(&counters);
        let worker = thread::Builder::new().name("capture".into()).spawn(move || {
            capture_loop(
                source,
                publisher,
                &worker_running,
                &worker_counters,
                stats_interval,
            )
        })?;

        Ok(Self {
            running,
            counters,
            worker: Some(worker),
        })
    }

    pub fn stats(&self) -> CaptureStats {
        self.counters.snapshot()
    }

    /// True until the source is exhausted or `stop` is called.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stop(mut self) -> CaptureStats {
        self.shutdown();
        self.counters.snapshot()
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("capture worker panicked");
            }
        }
    }
}

impl Drop for CaptureProducer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn capture_loop<S: FrameSource>(
    mut source: S,
    mut publisher: FramePublisher,
    running: &AtomicBool,
    counters: &Counters,
    stats_interval: Duration,
) {
    let mut window_start = Instant::now();
    let mut window_frames = 0u32;

    while running.load(Ordering::Acquire) {
        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!("frame source exhausted");
                break;
            }
            Err(err) => {
                counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, "capture failed");
                thread::sleep(FAILURE_BACKOFF);
                continue;
            }
        };
        counters.captured.fetch_add(1, Ordering::Relaxed);

        match publisher.publish(&frame.data, frame.width, frame.height, frame.format) {
            PublishOutcome::Published(_) => {
                counters.published.fetch_add(1, Ordering::Relaxed);
                window_frames += 1;
            }
            PublishOutcome::Skipped => {
                counters.skipped.fetch_add(1, Ordering::Relaxed);
            }
            PublishOutcome::TooLarge { size, capacity } => {
                counters.oversized.fetch_add(1, Ordering::Relaxed);
                warn!(size, capacity, "frame larger than buffer, dropped");
            }
        }

        let elapsed = window_start.elapsed();
        if elapsed >= stats_interval {
            let stats = counters.snapshot();
            info!(
                fps = f64::from(window_frames) / elapsed.as_secs_f64(),
                captured = stats.captured,
                skipped = stats.skipped,
                oversized = stats.oversized,
                "capture throughput"
            );
            window_start = Instant::now();
            window_frames = 0;
        }
    }
    running.store(false, Ordering::Release);
    debug!("capture loop exited");
}

/// Replays the JPEG files of a directory in name order, forever, at a fixed rate.
#[derive(Debug)]
pub struct DirectorySource {
    files: Vec<PathBuf>,
    next: usize,
    period: Duration,
    due: Option<Instant>,
}

impl DirectorySource {
    pub fn open(dir: impl AsRef<Path>, fps: u32) -> Result<Self> {
        let dir = dir.as_ref();
        if fps == 0 {
            return Err(StreamError::InvalidConfig("fps must be at least 1".into()));
        }

        let mut files: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_jpeg_name(path))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(StreamError::NoFrames(dir.to_path_buf()));
        }
        info!(dir = %dir.display(), frames = files.len(), fps, "replaying frame directory");

        Ok(Self {
            files,
            next: 0,
            period: Duration::from_secs(1) / fps,
            due: None,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn pace(&mut self) {
        let now = Instant::now();
        match self.due {
            Some(due) if due > now => {
                thread::sleep(due - now);
                self.due = Some(due + self.period);
            }
            _ => self.due = Some(now + self.period),
        }
    }
}

impl FrameSource for DirectorySource {
    fn next_frame(&mut self) -> Result<Option<CapturedFrame>> {
        self.pace();
        let path = &self.files[self.next];
        self.next = (self.next + 1) % self.files.len();

        let data = fs::read(path)
            .map_err(|err| StreamError::Capture(format!("{}: {err}", path.display())))?;
        let (width, height) = jpeg_dimensions(&data).unwrap_or((0, 0));
        Ok(Some(CapturedFrame {
            data,
            width,
            height,
            format: PixelFormat::Jpeg,
        }))
    }
}

fn is_jpeg_name(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
}

/// Width and height from the first start-of-frame segment of a JPEG.
pub fn jpeg_dimensions(data: &[u8]) -> Option<(u16, u16)> {
    if !data.starts_with(&[0xFF, 0xD8]) {
        return None;
    }
    let mut pos = 2;
    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            return None;
        }
        let marker = data[pos + 1];
        // fill bytes
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        let len = usize::from(u16::from_be_bytes([data[pos + 2], data[pos + 3]]));
        let is_sof = matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            let segment = data.get(pos + 4..pos + 9)?;
            let height = u16::from_be_bytes([segment[1], segment[2]]);
            let width = u16::from_be_bytes([segment[3], segment[4]]);
            return Some((width, height));
        }
        pos += 2 + len;
    }
    None
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::latest::{frame_buffer, FrameBufferConfig};

    struct ScriptedSource {
        frames: VecDeque<Result<Option<CapturedFrame>>>,
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Result<Option<CapturedFrame>> {
            self.frames.pop_front().unwrap_or(Ok(None))
        }
    }

    fn jpeg(width: u16, height: u16) -> Vec<u8> {
        let mut data = vec![0xFF, 0xD8];
        // APP0 segment to skip over
        data.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x04, 0x00, 0x00]);
        data.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x0B, 0x08]);
        data.extend_from_slice(&height.to_be_bytes());
        data.extend_from_slice(&width.to_be_bytes());
        data.extend_from_slice(&[0x01, 0x01, 0x11, 0x00, 0xFF, 0xD9]);
        data
    }

    fn frame(data: Vec<u8>) -> Result<Option<CapturedFrame>> {
        Ok(Some(CapturedFrame {
            data,
            width: 320,
            height: 240,
            format: PixelFormat::Jpeg,
        }))
    }

    fn wait_stopped(producer: &CaptureProducer) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while producer.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn publishes_until_source_is_exhausted() {
        let (publisher, subscriber) = frame_buffer(FrameBufferConfig {
            capacity: 8,
            ..FrameBufferConfig::default()
        });
        let source = ScriptedSource {
            frames: VecDeque::from(vec![
                frame(b"one".to_vec()),
                Err(StreamError::Capture("sensor timeout".into())),
                frame(vec![0u8; 9]),
                frame(b"three".to_vec()),
            ]),
        };

        let producer = CaptureProducer::spawn(source, publisher, Duration::from_secs(5)).unwrap();
        wait_stopped(&producer);
        let stats = producer.stop();

        assert_eq!(
            stats,
            CaptureStats {
                captured: 3,
                published: 2,
                skipped: 0,
                oversized: 1,
                failures: 1,
            }
        );
        let latest = subscriber.try_read(0).unwrap();
        assert_eq!(latest.data.as_ref(), b"three");
        assert_eq!(latest.sequence, 2);
    }

    #[test]
    fn reads_dimensions_from_sof() {
        assert_eq!(jpeg_dimensions(&jpeg(640, 480)), Some((640, 480)));
        assert_eq!(jpeg_dimensions(b"not a jpeg"), None);
        assert_eq!(jpeg_dimensions(&[0xFF, 0xD8, 0xFF]), None);
    }

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "skybridge-{}-{}-{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir
    }

    #[test]
    fn directory_source_cycles_jpegs_in_order() {
        let dir = temp_dir("frames");
        fs::write(dir.join("b.jpg"), jpeg(2, 2)).unwrap();
        fs::write(dir.join("a.JPEG"), jpeg(1, 1)).unwrap();
        fs::write(dir.join("notes.txt"), b"ignored").unwrap();

        let mut source = DirectorySource::open(&dir, 1000).unwrap();
        assert_eq!(source.len(), 2);

        let sizes: Vec<(u16, u16)> = (0..3)
            .map(|_| {
                let f = source.next_frame().unwrap().unwrap();
                (f.width, f.height)
            })
            .collect();
        assert_eq!(sizes, vec![(1, 1), (2, 2), (1, 1)]);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn directory_source_paces_frames() {
        let dir = temp_dir("pace");
        fs::write(dir.join("f.jpg"), jpeg(1, 1)).unwrap();
        let mut source = DirectorySource::open(&dir, 50).unwrap();

        let start = Instant::now();
        for _ in 0..4 {
            source.next_frame().unwrap();
        }
        // first frame is immediate, then three 20 ms periods
        assert!(start.elapsed() >= Duration::from_millis(55));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = temp_dir("empty");
        assert!(matches!(
            DirectorySource::open(&dir, 10),
            Err(StreamError::NoFrames(_))
        ));
        let _ = fs::remove_dir_all(&dir);
    }
}
