//! Streaming wrapper over an inbound SOAP request body.
//!
//! Buffers a bounded "head" so the envelope can be inspected, then replays
//! the head followed by the untouched remainder for forwarding.

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::ReaderStream;

/// Bytes per read.
pub const DEFAULT_CHUNK_SIZE: usize = 2000;

/// Maximum chunks buffered into the head.
pub const DEFAULT_CHUNK_COUNT: usize = 5;

/// Closing tags that end the head search.
pub const ENVELOPE_TERMINATORS: [&[u8]; 2] = [b"</soapenv:Envelope>", b"</env:Envelope>"];

/// The replayed body, as forwarded upstream.
pub type BodyStream = BoxStream<'static, io::Result<Bytes>>;

/// Boxed inbound body reader.
pub type BodyReader = Box<dyn AsyncRead + Send + Unpin>;

pub struct SoapRequestStreamer<R> {
    reader: R,
    chunk_size: usize,
    chunk_count: usize,
    head: Option<Bytes>,
}

impl<R> SoapRequestStreamer<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self::with_limits(reader, DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_COUNT)
    }

    pub fn with_limits(reader: R, chunk_size: usize, chunk_count: usize) -> Self {
        Self {
            reader,
            chunk_size: chunk_size.max(1),
            chunk_count,
            head: None,
        }
    }

    /// Head bytes if [`head`](Self::head) already ran.
    pub fn cached_head(&self) -> Option<&Bytes> {
        self.head.as_ref()
    }

    /// Read up to `chunk_count` chunks, stopping after the chunk that
    /// completes an envelope terminator or at end of input.
    ///
    /// Memoized: later calls return the same bytes without reading.
    pub async fn head(&mut self) -> io::Result<Bytes> {
        if let Some(head) = &self.head {
            return Ok(head.clone());
        }

        let longest = ENVELOPE_TERMINATORS
            .iter()
            .map(|t| t.len())
            .max()
            .unwrap_or(1);
        let mut buf = BytesMut::with_capacity(self.chunk_size);

        for _ in 0..self.chunk_count {
            let before = buf.len();
            let read = read_chunk(&mut self.reader, &mut buf, self.chunk_size).await?;
            if read == 0 {
                break;
            }
            // Terminators may straddle chunk boundaries.
            let window = &buf[before.saturating_sub(longest - 1)..];
            if contains_terminator(window) || read < self.chunk_size {
                break;
            }
        }

        let head = buf.freeze();
        self.head = Some(head.clone());
        Ok(head)
    }
}

impl<R> SoapRequestStreamer<R>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    /// The full body: the head exactly once, then the rest in `chunk_size`
    /// reads. Concatenation equals the original input.
    pub fn into_stream(self) -> BodyStream {
        let head = self.head.filter(|h| !h.is_empty()).map(Ok);
        let rest = ReaderStream::with_capacity(self.reader, self.chunk_size);
        stream::iter(head).chain(rest).boxed()
    }
}

/// Fill one chunk. Short only at end of input.
async fn read_chunk<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut BytesMut,
    chunk_size: usize,
) -> io::Result<usize> {
    let mut chunk = vec![0u8; chunk_size];
    let mut filled = 0;
    while filled < chunk_size {
        let n = reader.read(&mut chunk[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.extend_from_slice(&chunk[..filled]);
    Ok(filled)
}

fn contains_terminator(window: &[u8]) -> bool {
    ENVELOPE_TERMINATORS
        .iter()
        .any(|t| window.windows(t.len()).any(|w| w == *t))
}
