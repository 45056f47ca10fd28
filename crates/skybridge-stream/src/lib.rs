//! Live camera streaming for the skybridge gateway.
//!
//! A capture producer publishes into a single-slot [`latest`] buffer; the
//! [`StreamServer`] gives every viewer its own thread that copies the newest
//! frame out and writes it as one part of a `multipart/x-mixed-replace`
//! response. Frames are never queued, so a slow viewer only ever skips frames.

pub mod capture;
pub mod error;
pub mod event;
pub mod http;
pub mod latest;
pub mod server;
pub mod slots;

pub use capture::{CaptureProducer, CaptureStats, CapturedFrame, DirectorySource, FrameSource};
pub use error::{Result, StreamError};
pub use event::StreamEvent;
pub use latest::{
    frame_buffer, FrameBufferConfig, FrameInfo, FramePublisher, FrameSubscriber, PixelFormat,
    PublishOutcome, PublishPolicy, VideoFrame, DEFAULT_FRAME_CAPACITY,
};
pub use server::{StreamConfig, StreamServer, StreamStats, DEFAULT_STREAM_PORT};
pub use slots::{ClientInfo, ClientSlots, ClientState, SlotGuard};
