//! Live MJPEG fan-out
//!
//! Every processed frame is JPEG-encoded once and broadcast as a ready-made
//! `multipart/x-mixed-replace` part. Slow viewers skip frames instead of
//! holding up the capture loop.

use std::convert::Infallible;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use futures_util::stream::{self, Stream};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageResult, RgbImage};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Multipart boundary between JPEG parts
pub const BOUNDARY: &str = "frame";
/// Value of the `Content-Type` header for a live stream response
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

pub const DEFAULT_QUALITY: u8 = 80;
/// Parts buffered per viewer before the oldest are dropped
pub const DEFAULT_CAPACITY: usize = 8;

/// Broadcasts encoded frames to any number of viewers
#[derive(Clone)]
pub struct StreamPublisher {
    tx: broadcast::Sender<Bytes>,
    quality: u8,
    published: Arc<AtomicU64>,
}

impl Default for StreamPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl StreamPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            quality: DEFAULT_QUALITY,
            published: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }

    /// Encode and broadcast one frame. Frames are skipped while nobody is
    /// watching; encode failures are logged and skipped.
    pub fn publish(&self, image: &RgbImage) {
        if self.tx.receiver_count() == 0 {
            return;
        }
        let jpeg = match encode_jpeg(image, self.quality) {
            Ok(jpeg) => jpeg,
            Err(e) => {
                warn!("JPEG encode failed, frame skipped: {}", e);
                return;
            }
        };
        if self.tx.send(multipart_part(&jpeg)).is_ok() {
            self.published.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of frames handed to at least one viewer
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn viewer_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Multipart body parts for one viewer. Ends once every publisher clone
    /// is dropped.
    pub fn subscribe(&self) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        let rx = self.tx.subscribe();
        stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(part) => return Some((Ok(part), rx)),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("Stream viewer lagged, skipped {} frames", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
    }
}

/// Baseline JPEG at the given quality (1-100)
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> ImageResult<Vec<u8>> {
    let mut out = Cursor::new(Vec::with_capacity(image.as_raw().len() / 8));
    JpegEncoder::new_with_quality(&mut out, quality).encode_image(image)?;
    Ok(out.into_inner())
}

/// `--frame\r\nContent-Type: image/jpeg\r\n\r\n<jpeg>\r\n`
pub fn multipart_part(jpeg: &[u8]) -> Bytes {
    let header = format!("--{}\r\nContent-Type: image/jpeg\r\n\r\n", BOUNDARY);
    let mut part = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use image::Rgb;

    fn image() -> RgbImage {
        RgbImage::from_pixel(32, 24, Rgb([120, 40, 200]))
    }

    #[test]
    fn part_framing() {
        let part = multipart_part(b"JPEG");
        assert_eq!(
            &part[..],
            b"--frame\r\nContent-Type: image/jpeg\r\n\r\nJPEG\r\n".as_slice()
        );
    }

    #[test]
    fn jpeg_has_soi_and_eoi_markers() {
        let jpeg = encode_jpeg(&image(), DEFAULT_QUALITY).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn publish_without_viewers_is_skipped() {
        let publisher = StreamPublisher::default();
        publisher.publish(&image());
        assert_eq!(publisher.published(), 0);
    }

    #[tokio::test]
    async fn every_viewer_gets_the_frame() {
        let publisher = StreamPublisher::default();
        let a = publisher.subscribe();
        let b = publisher.subscribe();
        tokio::pin!(a, b);

        publisher.publish(&image());

        for viewer in [a.next().await, b.next().await] {
            let part = viewer.unwrap().unwrap();
            assert!(part.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\xFF\xD8"));
            assert!(part.ends_with(b"\xFF\xD9\r\n"));
        }
        assert_eq!(publisher.published(), 1);
    }

    #[tokio::test]
    async fn lagging_viewer_skips_to_recent_frames() {
        let publisher = StreamPublisher::new(2);
        let viewer = publisher.subscribe();
        tokio::pin!(viewer);

        for _ in 0..5 {
            publisher.publish(&image());
        }
        // only the two newest parts remain buffered
        assert!(viewer.next().await.is_some());
        assert!(viewer.next().await.is_some());
        drop(publisher);
        assert!(viewer.next().await.is_none());
    }

    #[tokio::test]
    async fn stream_ends_when_publisher_is_dropped() {
        let publisher = StreamPublisher::default();
        let viewer = publisher.subscribe();
        drop(publisher);
        tokio::pin!(viewer);
        assert!(viewer.next().await.is_none());
    }
}
