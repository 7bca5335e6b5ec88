//! Frame sources.
//!
//! A [`FrameSource`] yields decoded frames in order until it runs dry. [`BoundedSource`] wraps
//! any source with the per-request budgets and guarantees the underlying decoder is released
//! exactly once, whichever way the request ends.
use std::{
    collections::VecDeque,
    fs::File,
    io::{self, BufReader, Read},
    path::Path,
    time::{Duration, Instant},
};

use image::RgbImage;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// A decoded frame.
pub type Frame = RgbImage;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];
const READ_CHUNK: usize = 64 * 1024;

/// Failure confined to a single frame. The frame counts as having no detections.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("failed to read frame: {0}")]
    Read(#[from] io::Error),

    #[error("failed to decode frame: {0}")]
    Decode(#[from] image::ImageError),

    #[error("failed to classify frame: {0}")]
    Classify(String),
}

pub trait FrameSource {
    /// Next frame in order, `None` once the stream has ended.
    fn next_frame(&mut self) -> Option<std::result::Result<Frame, FrameError>>;

    /// Free the underlying decoder resources.
    fn release(&mut self) {}
}

/// Decode a single encoded image (JPEG, PNG).
pub fn decode_image(bytes: &[u8]) -> std::result::Result<Frame, FrameError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// Splits a byte stream of concatenated JPEG images into one buffer per image.
///
/// Frames are delimited by the start-of-image and end-of-image markers. Bytes between frames
/// are skipped. A trailing frame without end marker is still yielded so that decoding can
/// report it.
pub struct MjpegReader<R> {
    reader: R,
    buf: Vec<u8>,
    /// Offset from which to continue searching for the end marker.
    scan_from: usize,
    eof: bool,
}

impl<R: Read> MjpegReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_prefix(reader, Vec::new())
    }

    fn with_prefix(reader: R, prefix: Vec<u8>) -> Self {
        Self {
            reader,
            buf: prefix,
            scan_from: 0,
            eof: false,
        }
    }

    fn fill(&mut self) -> io::Result<()> {
        let mut chunk = [0_u8; READ_CHUNK];
        loop {
            match self.reader.read(&mut chunk) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(());
                }
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl<R: Read> Iterator for MjpegReader<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match find_marker(&self.buf, SOI, 0) {
                Some(start) => {
                    if start > 0 {
                        self.buf.drain(..start);
                        self.scan_from = self.scan_from.saturating_sub(start);
                    }
                    let from = self.scan_from.max(SOI.len());
                    if let Some(end) = find_marker(&self.buf, EOI, from) {
                        let frame: Vec<u8> = self.buf.drain(..end + EOI.len()).collect();
                        self.scan_from = 0;
                        return Some(Ok(frame));
                    }
                    // Resume one byte early in case the marker straddles two reads
                    self.scan_from = self.buf.len().saturating_sub(1).max(SOI.len());
                }
                None => {
                    // Keep a trailing 0xFF, it may begin a marker
                    let keep = usize::from(self.buf.last() == Some(&0xFF));
                    let drop = self.buf.len() - keep;
                    self.buf.drain(..drop);
                    self.scan_from = 0;
                }
            }

            if self.eof {
                return match find_marker(&self.buf, SOI, 0) {
                    Some(_) => {
                        self.scan_from = 0;
                        Some(Ok(std::mem::take(&mut self.buf)))
                    }
                    None => None,
                };
            }

            if let Err(e) = self.fill() {
                self.eof = true;
                self.buf.clear();
                return Some(Err(e));
            }
        }
    }
}

fn find_marker(buf: &[u8], marker: [u8; 2], from: usize) -> Option<usize> {
    if from >= buf.len() {
        return None;
    }
    buf[from..]
        .windows(2)
        .position(|w| w == marker)
        .map(|pos| pos + from)
}

/// Motion-JPEG stream decoded frame by frame.
pub struct MjpegSource<R> {
    frames: Option<MjpegReader<R>>,
}

impl MjpegSource<BufReader<File>> {
    /// Open an MJPEG file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            Error::SourceUnavailable(format!("cannot open {}: {e}", path.display()))
        })?;
        Self::new(BufReader::new(file))
    }
}

impl<R: Read> MjpegSource<R> {
    /// Wrap a reader. Fails if the stream is non-empty but does not start like a JPEG.
    pub fn new(mut reader: R) -> Result<Self> {
        let mut prefix = [0_u8; 2];
        let mut filled = 0;
        while filled < prefix.len() {
            match reader.read(&mut prefix[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::SourceUnavailable(format!("cannot read stream: {e}"))),
            }
        }

        if filled == 1 || (filled == 2 && prefix != SOI) {
            return Err(Error::SourceUnavailable(
                "stream does not start with a JPEG frame".into(),
            ));
        }

        Ok(Self {
            frames: Some(MjpegReader::with_prefix(reader, prefix[..filled].to_vec())),
        })
    }
}

impl<R: Read> FrameSource for MjpegSource<R> {
    fn next_frame(&mut self) -> Option<std::result::Result<Frame, FrameError>> {
        let jpeg = self.frames.as_mut()?.next()?;
        Some(jpeg.map_err(FrameError::from).and_then(|jpeg| decode_image(&jpeg)))
    }

    fn release(&mut self) {
        self.frames = None;
    }
}

/// Frames held in memory.
#[derive(Default)]
pub struct MemorySource {
    frames: VecDeque<std::result::Result<Frame, FrameError>>,
}

impl MemorySource {
    pub fn new(frames: impl IntoIterator<Item = Frame>) -> Self {
        Self {
            frames: frames.into_iter().map(Ok).collect(),
        }
    }

    /// Queue a frame that fails to decode.
    pub fn push_failure(&mut self, err: FrameError) {
        self.frames.push_back(Err(err));
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push_back(Ok(frame));
    }
}

impl FrameSource for MemorySource {
    fn next_frame(&mut self) -> Option<std::result::Result<Frame, FrameError>> {
        self.frames.pop_front()
    }

    fn release(&mut self) {
        self.frames.clear();
    }
}

/// Encoded frames pushed through a channel, e.g. from the clip socket.
///
/// Blocks while waiting for the next frame; must be driven from a blocking thread. Dropping
/// the sender ends the stream.
pub struct ChannelSource {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self { rx }
    }
}

impl FrameSource for ChannelSource {
    fn next_frame(&mut self) -> Option<std::result::Result<Frame, FrameError>> {
        self.rx.blocking_recv().map(|data| decode_image(&data))
    }

    fn release(&mut self) {
        self.rx.close();
    }
}

/// Why a [`BoundedSource`] stopped yielding frames.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EndCause {
    /// The wrapped source ran dry.
    Exhausted,
    FrameLimit,
    TimeLimit,
    Cancelled,
}

/// Applies frame, time and cancellation bounds to a source.
pub struct BoundedSource<S: FrameSource> {
    inner: Option<S>,
    frame_limit: usize,
    deadline: Option<Instant>,
    cancel: CancellationToken,
    consumed: usize,
    end: Option<EndCause>,
}

impl<S: FrameSource> BoundedSource<S> {
    pub fn new(
        inner: S,
        frame_limit: usize,
        time_budget: Option<Duration>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Some(inner),
            frame_limit,
            deadline: time_budget.map(|budget| Instant::now() + budget),
            cancel,
            consumed: 0,
            end: None,
        }
    }

    /// Number of frames handed out so far.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Why the source ended, `None` while frames may still follow.
    pub fn end_cause(&self) -> Option<EndCause> {
        self.end
    }

    fn interrupted(&self) -> Option<EndCause> {
        if self.cancel.is_cancelled() {
            return Some(EndCause::Cancelled);
        }
        if self.deadline.map_or(false, |deadline| Instant::now() >= deadline) {
            return Some(EndCause::TimeLimit);
        }
        None
    }

    fn finish(&mut self, cause: EndCause) {
        self.end.get_or_insert(cause);
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            inner.release();
            log::debug!("Released frame source after {} frames", self.consumed);
        }
    }
}

impl<S: FrameSource> FrameSource for BoundedSource<S> {
    fn next_frame(&mut self) -> Option<std::result::Result<Frame, FrameError>> {
        if self.end.is_some() {
            return None;
        }

        if let Some(cause) = self.interrupted() {
            self.finish(cause);
            return None;
        }
        if self.consumed >= self.frame_limit {
            self.finish(EndCause::FrameLimit);
            return None;
        }

        match self.inner.as_mut().and_then(|inner| inner.next_frame()) {
            Some(frame) => {
                self.consumed += 1;
                Some(frame)
            }
            None => {
                // A blocking source may have been closed by whoever cancelled the request
                let cause = self.interrupted().unwrap_or(EndCause::Exhausted);
                self.finish(cause);
                None
            }
        }
    }

    fn release(&mut self) {
        self.release_inner();
    }
}

impl<S: FrameSource> Drop for BoundedSource<S> {
    fn drop(&mut self) {
        self.release_inner();
    }
}
