//! Streaming response bodies composed with their underlying resources.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use crate::chain::ResourceChain;
use crate::error::Result;

/// A pull-based stream of body bytes.
///
/// Raw connection framing and each decompression layer implement this, so a
/// decoded body is a stack of `BodyStream`s with the wire at the bottom.
#[async_trait]
pub trait BodyStream: Send {
    /// Return the next chunk of bytes, or `None` at end of stream.
    async fn next_chunk(&mut self) -> Result<Option<Bytes>>;
}

/// A response body: a readable layer stack plus the resource chain that owns
/// the connection (and, for HTTP/2, the session driver).
///
/// Reads are not bounded by the request deadline; once the response has been
/// returned, cancellation is driven by the caller closing the body.
pub struct Body {
    reader: Option<Box<dyn BodyStream>>,
    resources: ResourceChain,
}

impl Body {
    /// Compose a reader stack with the resources its bytes depend on.
    pub fn new(reader: Box<dyn BodyStream>, resources: ResourceChain) -> Self {
        Self { reader: Some(reader), resources }
    }

    /// An empty, resource-free body (HEAD responses, 204/304).
    pub fn empty() -> Self {
        Self { reader: None, resources: ResourceChain::new() }
    }

    /// Pull the next decoded chunk. Returns `None` at end of body.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        match &mut self.reader {
            Some(reader) => reader.next_chunk().await,
            None => Ok(None),
        }
    }

    /// Read the remainder of the body into one buffer, then close.
    /// Read failures are joined with the close result.
    pub async fn bytes(mut self) -> Result<Bytes> {
        let mut out = BytesMut::new();
        loop {
            match self.chunk().await {
                Ok(Some(chunk)) => out.extend_from_slice(&chunk),
                Ok(None) => break,
                Err(e) => return Err(e.with_cleanup(self.close().await)),
            }
        }
        self.close().await?;
        Ok(out.freeze())
    }

    /// Release every decoder layer and every underlying resource.
    ///
    /// Safe to call more than once; repeat calls return `Ok` without
    /// re-reporting earlier failures.
    pub async fn close(&mut self) -> Result<()> {
        // Dropping the stack releases decoder state and the read half of the
        // connection before the chain shuts down the rest.
        self.reader = None;
        self.resources.close().await
    }

    /// Read to end of stream, then close, joining both error sources.
    pub async fn drain_and_close(&mut self) -> Result<()> {
        let drained = loop {
            match self.chunk().await {
                Ok(Some(_)) => continue,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        match drained {
            Ok(()) => self.close().await,
            Err(e) => Err(e.with_cleanup(self.close().await)),
        }
    }

    pub(crate) fn take_reader(&mut self) -> Option<Box<dyn BodyStream>> {
        self.reader.take()
    }

    pub(crate) fn set_reader(&mut self, reader: Box<dyn BodyStream>) {
        self.reader = Some(reader);
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Body")
            .field("open", &self.reader.is_some())
            .field("resources", &self.resources)
            .finish()
    }
}

/// In-memory body stream, used for buffered sources and in tests.
pub struct MemoryStream {
    chunks: std::collections::VecDeque<Bytes>,
}

impl MemoryStream {
    pub fn new(chunks: Vec<Bytes>) -> Self {
        Self { chunks: chunks.into() }
    }

    pub fn single(bytes: impl Into<Bytes>) -> Self {
        Self::new(vec![bytes.into()])
    }
}

#[async_trait]
impl BodyStream for MemoryStream {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        Ok(self.chunks.pop_front())
    }
}
