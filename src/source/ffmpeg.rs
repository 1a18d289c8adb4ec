//! ffmpeg-backed frame source
//!
//! Spawns one `ffmpeg` child per capture handle, decoding the upstream
//! stream and re-encoding it as an MJPEG sequence on stdout. Frames are
//! recovered by scanning for JPEG SOI/EOI markers, so the relay never links
//! against a media library.

use std::process::Stdio;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};

use super::{FrameError, FrameSource, SourceOpener};

/// JPEG start-of-image marker
const SOI: [u8; 2] = [0xFF, 0xD8];
/// JPEG end-of-image marker
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Refuse to buffer a single frame beyond this size
const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Opens capture handles by spawning `ffmpeg`
pub struct FfmpegOpener {
    binary: String,
}

impl FfmpegOpener {
    /// Use `ffmpeg` from `PATH`
    pub fn new() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
        }
    }

    /// Use a specific ffmpeg binary
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for FfmpegOpener {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceOpener for FfmpegOpener {
    async fn open(&self, uri: &str, quality: u8) -> Result<Box<dyn FrameSource>, FrameError> {
        let mut command = Command::new(&self.binary);
        command.arg("-nostdin").args(["-loglevel", "error"]);

        if uri.starts_with("rtsp://") {
            command.args(["-rtsp_transport", "tcp"]);
        }

        command
            .args(["-i", uri])
            .args(["-f", "image2pipe"])
            .args(["-vcodec", "mjpeg"])
            .args(["-q:v", &qscale(quality).to_string()])
            .arg("pipe:1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| FrameError::OpenFailed(format!("failed to spawn {}: {e}", self.binary)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FrameError::OpenFailed("ffmpeg stdout not captured".to_string()))?;

        let mut source = FfmpegSource {
            child,
            stdout,
            buf: BytesMut::with_capacity(64 * 1024),
            pending: None,
        };

        // The spawn itself succeeds even for unreachable URLs, so the open is
        // only confirmed once the first frame arrives. The caller bounds this
        // whole call with its open timeout.
        match source.read_frame().await {
            Ok(frame) => {
                source.pending = Some(frame);
                Ok(Box::new(source))
            }
            Err(e) => {
                source.close().await;
                Err(FrameError::OpenFailed(format!(
                    "no frame from {uri}: {e}"
                )))
            }
        }
    }
}

/// One running ffmpeg child emitting MJPEG on stdout
struct FfmpegSource {
    child: Child,
    stdout: ChildStdout,
    buf: BytesMut,
    /// First frame, pre-read while confirming the open
    pending: Option<Bytes>,
}

impl FfmpegSource {
    async fn read_frame(&mut self) -> Result<Bytes, FrameError> {
        loop {
            if let Some(frame) = extract_jpeg(&mut self.buf)? {
                return Ok(frame);
            }

            let n = self.stdout.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(FrameError::EndOfStream);
            }
        }
    }
}

#[async_trait]
impl FrameSource for FfmpegSource {
    async fn next_frame(&mut self) -> Result<Bytes, FrameError> {
        if let Some(frame) = self.pending.take() {
            return Ok(frame);
        }
        self.read_frame().await
    }

    async fn close(&mut self) {
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
    }
}

/// Map transport quality (0-100, higher is better) to ffmpeg's mjpeg
/// qscale (2-31, lower is better)
fn qscale(quality: u8) -> u32 {
    let quality = u32::from(quality.min(100));
    2 + (100 - quality) * 29 / 100
}

/// Pull one complete JPEG image off the front of `buf`
///
/// Leading bytes before the SOI marker are discarded. Returns `Ok(None)`
/// when the buffer holds no complete image yet.
fn extract_jpeg(buf: &mut BytesMut) -> Result<Option<Bytes>, FrameError> {
    let Some(start) = find_marker(buf, &SOI) else {
        // No SOI: keep only a trailing byte in case it is half a marker
        if buf.len() > 1 {
            let tail = buf.len() - 1;
            let _ = buf.split_to(tail);
        }
        return Ok(None);
    };

    if start > 0 {
        let _ = buf.split_to(start);
    }

    match find_marker(&buf[SOI.len()..], &EOI) {
        Some(offset) => {
            let end = SOI.len() + offset + EOI.len();
            Ok(Some(buf.split_to(end).freeze()))
        }
        None => {
            if buf.len() > MAX_FRAME_BYTES {
                buf.clear();
                return Err(FrameError::Encode(
                    "frame exceeds maximum buffered size".to_string(),
                ));
            }
            Ok(None)
        }
    }
}

fn find_marker(haystack: &[u8], marker: &[u8]) -> Option<usize> {
    haystack.windows(2).position(|window| window == marker)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(body: &[u8]) -> Vec<u8> {
        let mut data = SOI.to_vec();
        data.extend_from_slice(body);
        data.extend_from_slice(&EOI);
        data
    }

    #[test]
    fn test_extract_complete_frame() {
        let mut buf = BytesMut::from(&jpeg(b"abc")[..]);

        let frame = extract_jpeg(&mut buf).unwrap().unwrap();
        assert_eq!(&frame[..2], &SOI);
        assert_eq!(&frame[frame.len() - 2..], &EOI);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_extract_incomplete_frame() {
        let mut buf = BytesMut::from(&[0xFF, 0xD8, 0x01, 0x02][..]);

        assert!(extract_jpeg(&mut buf).unwrap().is_none());
        // Partial frame stays buffered
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn test_extract_discards_leading_garbage() {
        let mut data = vec![0x00, 0x11, 0x22];
        data.extend_from_slice(&jpeg(b"x"));
        let mut buf = BytesMut::from(&data[..]);

        let frame = extract_jpeg(&mut buf).unwrap().unwrap();
        assert_eq!(&frame[..2], &SOI);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_extract_two_frames_in_sequence() {
        let mut data = jpeg(b"first");
        data.extend_from_slice(&jpeg(b"second"));
        let mut buf = BytesMut::from(&data[..]);

        let first = extract_jpeg(&mut buf).unwrap().unwrap();
        let second = extract_jpeg(&mut buf).unwrap().unwrap();
        assert_eq!(first.len(), 4 + 5);
        assert_eq!(second.len(), 4 + 6);
        assert!(extract_jpeg(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_garbage_without_soi_is_bounded() {
        let mut buf = BytesMut::from(&[0x00u8; 1024][..]);

        assert!(extract_jpeg(&mut buf).unwrap().is_none());
        // Only a possible half-marker byte is retained
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn test_qscale_mapping() {
        assert_eq!(qscale(100), 2);
        assert_eq!(qscale(0), 31);
        // Default transport quality lands mid-scale
        assert_eq!(qscale(70), 10);
    }
}
