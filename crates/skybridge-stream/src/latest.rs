//! Single-slot latest-frame buffer.
//!
//! One [`FramePublisher`] overwrites the slot in place; any number of
//! [`FrameSubscriber`]s copy it out when its sequence number moves. Nothing is
//! ever queued: a reader that falls behind simply sees the newest frame.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Default slot capacity.
pub const DEFAULT_FRAME_CAPACITY: usize = 100 * 1024;

const WAIT_STEP: Duration = Duration::from_micros(500);

/// Pixel layout of a captured frame. Frames travel opaquely; the tag only
/// selects the part content type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    #[default]
    Jpeg,
    Yuyv,
    Rgb565,
    Grayscale,
}

impl PixelFormat {
    pub fn mime(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Yuyv | Self::Rgb565 | Self::Grayscale => "application/octet-stream",
        }
    }
}

/// What the publisher does when a reader holds the slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishPolicy {
    /// Drop the frame immediately.
    #[default]
    SkipIfBusy,
    /// Retry for at most this long, then drop the frame.
    WaitUpTo(#[serde(with = "millis")] Duration),
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameBufferConfig {
    pub capacity: usize,
    pub policy: PublishPolicy,
}

impl Default for FrameBufferConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_FRAME_CAPACITY,
            policy: PublishPolicy::default(),
        }
    }
}

/// Result of one publish attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Stored under this sequence number.
    Published(u64),
    /// A reader held the slot; the frame was dropped.
    Skipped,
    /// The frame exceeds the slot capacity; the frame was dropped.
    TooLarge { size: usize, capacity: usize },
}

/// Metadata of the frame currently in the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub sequence: u64,
    pub size: usize,
    pub width: u16,
    pub height: u16,
    pub format: PixelFormat,
    pub captured_at: Instant,
}

/// An owned copy of a published frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub data: Bytes,
    pub capacity: usize,
    pub width: u16,
    pub height: u16,
    pub format: PixelFormat,
    pub timestamp: Instant,
    pub sequence: u64,
}

impl VideoFrame {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

struct Slot {
    data: Vec<u8>,
    width: u16,
    height: u16,
    format: PixelFormat,
    captured_at: Instant,
    /// Zero until the first publish.
    sequence: u64,
}

impl Slot {
    fn info(&self) -> FrameInfo {
        FrameInfo {
            sequence: self.sequence,
            size: self.data.len(),
            width: self.width,
            height: self.height,
            format: self.format,
            captured_at: self.captured_at,
        }
    }

    fn is_newer_than(&self, last_seen: u64) -> bool {
        self.sequence != 0 && self.sequence != last_seen
    }
}

struct Inner {
    slot: Mutex<Slot>,
    capacity: usize,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_lock(&self) -> Option<MutexGuard<'_, Slot>> {
        match self.slot.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}

/// Create a latest-frame buffer. The slot is allocated once, up front.
pub fn frame_buffer(config: FrameBufferConfig) -> (FramePublisher, FrameSubscriber) {
    let inner = Arc::new(Inner {
        slot: Mutex::new(Slot {
            data: Vec::with_capacity(config.capacity),
            width: 0,
            height: 0,
            format: PixelFormat::default(),
            captured_at: Instant::now(),
            sequence: 0,
        }),
        capacity: config.capacity,
    });
    (
        FramePublisher {
            inner: Arc::clone(&inner),
            policy: config.policy,
        },
        FrameSubscriber { inner },
    )
}

/// The single writer of a frame buffer.
pub struct FramePublisher {
    inner: Arc<Inner>,
    policy: PublishPolicy,
}

impl FramePublisher {
    /// Overwrite the slot with `data`. Never waits longer than the policy allows.
    pub fn publish(
        &mut self,
        data: &[u8],
        width: u16,
        height: u16,
        format: PixelFormat,
    ) -> PublishOutcome {
        if data.len() > self.inner.capacity {
            return PublishOutcome::TooLarge {
                size: data.len(),
                capacity: self.inner.capacity,
            };
        }

        let Some(mut slot) = self.acquire() else {
            return PublishOutcome::Skipped;
        };

        slot.data.clear();
        slot.data.extend_from_slice(data);
        slot.width = width;
        slot.height = height;
        slot.format = format;
        slot.captured_at = Instant::now();
        slot.sequence += 1;
        PublishOutcome::Published(slot.sequence)
    }

    fn acquire(&self) -> Option<MutexGuard<'_, Slot>> {
        match self.policy {
            PublishPolicy::SkipIfBusy => self.inner.try_lock(),
            PublishPolicy::WaitUpTo(limit) => {
                let deadline = Instant::now() + limit;
                loop {
                    if let Some(slot) = self.inner.try_lock() {
                        return Some(slot);
                    }
                    if Instant::now() >= deadline {
                        return None;
                    }
                    thread::sleep(WAIT_STEP);
                }
            }
        }
    }

    pub fn policy(&self) -> PublishPolicy {
        self.policy
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// A new reader of this buffer.
    pub fn subscribe(&self) -> FrameSubscriber {
        FrameSubscriber {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// A reader of a frame buffer. Clone freely; one per consumer.
#[derive(Clone)]
pub struct FrameSubscriber {
    inner: Arc<Inner>,
}

impl FrameSubscriber {
    /// Copy out the current frame if its sequence differs from `last_seen`.
    pub fn try_read(&self, last_seen: u64) -> Option<VideoFrame> {
        let slot = self.inner.lock();
        if !slot.is_newer_than(last_seen) {
            return None;
        }
        Some(VideoFrame {
            data: Bytes::copy_from_slice(&slot.data),
            capacity: self.inner.capacity,
            width: slot.width,
            height: slot.height,
            format: slot.format,
            timestamp: slot.captured_at,
            sequence: slot.sequence,
        })
    }

    /// Like `try_read`, but copies into a caller-owned buffer.
    pub fn read_into(&self, last_seen: u64, buf: &mut Vec<u8>) -> Option<FrameInfo> {
        let slot = self.inner.lock();
        if !slot.is_newer_than(last_seen) {
            return None;
        }
        buf.clear();
        buf.extend_from_slice(&slot.data);
        Some(slot.info())
    }

    /// Sequence number of the current frame; zero before the first publish.
    pub fn sequence(&self) -> u64 {
        self.inner.lock().sequence
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

impl std::fmt::Debug for FrameSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSubscriber")
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}

impl std::fmt::Debug for FramePublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePublisher")
            .field("capacity", &self.inner.capacity)
            .field("policy", &self.policy)
            .finish()
    }
}
