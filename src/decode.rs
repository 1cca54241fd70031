//! Layered content-decoding pipeline.
//!
//! `Content-Encoding` lists tokens in application order, leftmost first, so
//! decoding walks the list in reverse and wraps one decoder layer per token
//! on top of the raw body. Each layer pushes wire chunks through a
//! write-side decoder and hands the inflated output back as chunks, so the
//! body keeps streaming no matter how deep the stack is.

use std::io::Write;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use http::header::CONTENT_ENCODING;

use crate::body::{BodyStream, MemoryStream};
use crate::error::{Error, Result};
use crate::response::Response;

/// Decode the response body in place according to `Content-Encoding`.
///
/// On an unknown token the already-built layers are put back on the body so
/// the caller's drain-and-close still releases every resource; the error
/// reports the offending token.
pub fn decode_response(res: &mut Response) -> Result<()> {
    let Some(value) = res.headers.get(CONTENT_ENCODING) else {
        return Ok(());
    };
    let value = value
        .to_str()
        .map_err(|_| Error::decode("Content-Encoding is not valid ASCII"))?
        .to_owned();

    let mut reader = res
        .body
        .take_reader()
        .unwrap_or_else(|| Box::new(MemoryStream::new(Vec::new())));

    // Rightmost token was applied last, so it comes off first.
    for token in value.split(',').rev() {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        match DecodeLayer::new(token, reader) {
            Ok(layer) => {
                tracing::trace!(token, "stacking content decoder");
                reader = Box::new(layer);
            }
            Err((reader_back, err)) => {
                res.body.set_reader(reader_back);
                return Err(err);
            }
        }
    }

    res.headers.remove(CONTENT_ENCODING);
    res.body.set_reader(reader);
    Ok(())
}

/// Shared output buffer the write-side decoders inflate into.
#[derive(Clone, Default)]
struct SinkBuf(Arc<Mutex<Vec<u8>>>);

impl SinkBuf {
    fn take(&self) -> Bytes {
        let mut guard = match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Bytes::from(std::mem::take(&mut *guard))
    }
}

impl Write for SinkBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

enum Decoder {
    Gzip(flate2::write::GzDecoder<SinkBuf>),
    Deflate(flate2::write::DeflateDecoder<SinkBuf>),
    Brotli(Box<brotli::DecompressorWriter<SinkBuf>>),
    Zstd(ZstdDecoder),
}

impl Decoder {
    fn token(&self) -> &'static str {
        match self {
            Self::Gzip(_) => "gzip",
            Self::Deflate(_) => "deflate",
            Self::Brotli(_) => "br",
            Self::Zstd(_) => "zstd",
        }
    }

    fn feed(&mut self, chunk: &[u8]) -> Result<()> {
        let result = match self {
            Self::Gzip(d) => d.write_all(chunk),
            Self::Deflate(d) => d.write_all(chunk),
            Self::Brotli(d) => d.write_all(chunk),
            Self::Zstd(d) => d.write_all(chunk),
        };
        result.map_err(|e| Error::decode(format!("{}: {e}", self.token())))
    }

    /// Signal end of compressed input. Every format validates that its
    /// stream actually ended, so a response truncated mid-frame errors
    /// instead of passing off a prefix as the full body.
    fn finish(&mut self) -> Result<()> {
        let result = match self {
            Self::Gzip(d) => d.try_finish(),
            Self::Deflate(d) => d.try_finish(),
            Self::Brotli(d) => d.close(),
            Self::Zstd(d) => d.finish(),
        };
        result.map_err(|e| Error::decode(format!("{}: {e}", self.token())))
    }
}

/// Push-mode zstd decoder over the raw streaming API. Each `run` call
/// reports whether the current frame is complete, which `finish` checks to
/// catch streams cut off mid-frame.
struct ZstdDecoder {
    op: zstd::stream::raw::Decoder<'static>,
    out: SinkBuf,
    frame_done: bool,
}

impl ZstdDecoder {
    fn new(out: SinkBuf) -> std::io::Result<Self> {
        Ok(Self {
            op: zstd::stream::raw::Decoder::new()?,
            out,
            frame_done: true,
        })
    }

    fn write_all(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        use zstd::stream::raw::{InBuffer, Operation, OutBuffer};

        let mut input = InBuffer::around(chunk);
        let mut buf = [0u8; 8 * 1024];
        loop {
            let mut output = OutBuffer::around(&mut buf[..]);
            let hint = self.op.run(&mut input, &mut output)?;
            // A hint of zero means the frame just ended.
            self.frame_done = hint == 0;
            let produced = output.pos();
            self.out.write_all(output.as_slice())?;
            if input.pos >= input.src.len() && produced < buf.len() {
                return Ok(());
            }
        }
    }

    fn finish(&mut self) -> std::io::Result<()> {
        if self.frame_done {
            Ok(())
        } else {
            Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "stream ended mid-frame",
            ))
        }
    }
}

/// One decompression layer over an inner body stream.
struct DecodeLayer {
    inner: Box<dyn BodyStream>,
    decoder: Decoder,
    out: SinkBuf,
    finished: bool,
}

impl DecodeLayer {
    /// Build a layer for `token`, or hand the inner reader back untouched
    /// when the token is unknown or the decoder fails to initialize.
    fn new(
        token: &str,
        inner: Box<dyn BodyStream>,
    ) -> std::result::Result<Self, (Box<dyn BodyStream>, Error)> {
        let out = SinkBuf::default();
        let decoder = match token {
            "gzip" => Decoder::Gzip(flate2::write::GzDecoder::new(out.clone())),
            // Raw deflate, no zlib container header.
            "deflate" => Decoder::Deflate(flate2::write::DeflateDecoder::new(out.clone())),
            "br" => Decoder::Brotli(Box::new(brotli::DecompressorWriter::new(out.clone(), 4096))),
            "zstd" => match ZstdDecoder::new(out.clone()) {
                Ok(d) => Decoder::Zstd(d),
                Err(e) => return Err((inner, Error::decode(format!("zstd: {e}")))),
            },
            other => {
                return Err((inner, Error::UnsupportedEncoding(other.to_string())));
            }
        };
        Ok(Self { inner, decoder, out, finished: false })
    }
}

#[async_trait]
impl BodyStream for DecodeLayer {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        loop {
            let pending = self.out.take();
            if !pending.is_empty() {
                return Ok(Some(pending));
            }
            if self.finished {
                return Ok(None);
            }
            match self.inner.next_chunk().await? {
                Some(chunk) => self.decoder.feed(&chunk)?,
                None => {
                    self.decoder.finish()?;
                    self.finished = true;
                }
            }
        }
    }
}
