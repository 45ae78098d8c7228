//! Streaming content decoding.
//!
//! A [`Decompressor`] is a push-style sink in front of a [`BodySink`]:
//! `write` as the framer delivers raw body bytes, `close` once at the end.
//! `identity` is a pass-through; gzip and deflate decode via flate2, with
//! the deflate path sniffing its first byte to tell zlib-wrapped data from
//! raw streams. bzip2 and lzma are opaque: they decode only when the
//! caller registers an external [`Codec`] for the tag.

use std::fmt;
use std::io::{self, Write};

use flate2::write::{DeflateDecoder, GzDecoder, ZlibDecoder};

use crate::headers::ContentEncoding;
use crate::http::{BodySink, HttpError};

// ===== External codec seam =====

/// An externally supplied streaming decoder.
pub trait Codec: Send {
    fn write(
        &mut self,
        input: &[u8],
        out: &mut dyn FnMut(&[u8]) -> io::Result<()>,
    ) -> io::Result<()>;

    fn close(&mut self, out: &mut dyn FnMut(&[u8]) -> io::Result<()>) -> io::Result<()>;
}

/// Opens [`Codec`] values for tags the built-in table cannot decode.
pub trait CodecFactory: Send + Sync {
    fn open(&self, tag: ContentEncoding) -> Option<Box<dyn Codec>>;
}

// ===== Decompressor =====

/// Write end of the decode pipeline for one response body.
pub struct Decompressor<'a> {
    inner: Inner<'a>,
}

enum Inner<'a> {
    Identity(SinkWriter<'a>),
    Gzip(Box<GzDecoder<SinkWriter<'a>>>),
    /// Deflate before the first byte decides zlib vs raw.
    DeflatePending(Option<SinkWriter<'a>>),
    Zlib(Box<ZlibDecoder<SinkWriter<'a>>>),
    RawDeflate(Box<DeflateDecoder<SinkWriter<'a>>>),
    External {
        codec: Box<dyn Codec>,
        sink: &'a mut dyn BodySink,
    },
}

impl fmt::Debug for Decompressor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.inner {
            Inner::Identity(_) => "identity",
            Inner::Gzip(_) => "gzip",
            Inner::DeflatePending(_) | Inner::Zlib(_) | Inner::RawDeflate(_) => "deflate",
            Inner::External { .. } => "external",
        };
        f.debug_tuple("Decompressor").field(&tag).finish()
    }
}

impl<'a> Decompressor<'a> {
    /// Open a decoder for `tag` in front of `sink`.
    ///
    /// # Errors
    ///
    /// [`HttpError::UnsupportedEncoding`] when `tag` names a codec with no
    /// built-in decoder and `factory` does not provide one either.
    pub fn open(
        tag: ContentEncoding,
        sink: &'a mut dyn BodySink,
        factory: Option<&dyn CodecFactory>,
    ) -> Result<Decompressor<'a>, HttpError> {
        let inner = match tag {
            ContentEncoding::Identity => Inner::Identity(SinkWriter { sink }),
            ContentEncoding::Gzip => Inner::Gzip(Box::new(GzDecoder::new(SinkWriter { sink }))),
            ContentEncoding::Deflate => Inner::DeflatePending(Some(SinkWriter { sink })),
            tag => match factory.and_then(|f| f.open(tag)) {
                Some(codec) => Inner::External { codec, sink },
                None => return Err(HttpError::UnsupportedEncoding(tag.as_str())),
            },
        };
        Ok(Decompressor { inner })
    }

    /// Push raw body bytes through the decoder.
    pub fn write(&mut self, data: &[u8]) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        if matches!(self.inner, Inner::DeflatePending(_)) {
            let prev = std::mem::replace(&mut self.inner, Inner::DeflatePending(None));
            if let Inner::DeflatePending(Some(writer)) = prev {
                // zlib streams start with a CMF byte whose low nibble is 8
                self.inner = if data[0] & 0x0f == 8 {
                    Inner::Zlib(Box::new(ZlibDecoder::new(writer)))
                } else {
                    Inner::RawDeflate(Box::new(DeflateDecoder::new(writer)))
                };
            }
        }
        match &mut self.inner {
            Inner::Identity(w) => w.write_all(data),
            Inner::Gzip(d) => d.write_all(data),
            Inner::DeflatePending(_) => Ok(()),
            Inner::Zlib(d) => d.write_all(data),
            Inner::RawDeflate(d) => d.write_all(data),
            Inner::External { codec, sink } => {
                codec.write(data, &mut |out| sink.on_bytes(out))
            }
        }
    }

    /// Flush trailing decoder state. Consumes the decompressor.
    pub fn close(self) -> io::Result<()> {
        match self.inner {
            Inner::Identity(_) | Inner::DeflatePending(_) => Ok(()),
            Inner::Gzip(d) => d.finish().map(drop),
            Inner::Zlib(d) => d.finish().map(drop),
            Inner::RawDeflate(d) => d.finish().map(drop),
            Inner::External { mut codec, sink } => {
                codec.close(&mut |out| sink.on_bytes(out))
            }
        }
    }
}

struct SinkWriter<'a> {
    sink: &'a mut dyn BodySink,
}

impl io::Write for SinkWriter<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.sink.on_bytes(data)?;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::CollectSink;
    use flate2::Compression;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn test_identity_pass_through() {
        let mut sink = CollectSink::default();
        let mut dc = Decompressor::open(ContentEncoding::Identity, &mut sink, None).unwrap();
        dc.write(b"he").unwrap();
        dc.write(b"llo").unwrap();
        dc.close().unwrap();
        assert_eq!(&sink.buf[..], b"hello");
    }

    #[test]
    fn test_gzip_streaming() {
        let wire = gzip(b"some payload worth compressing, some payload");
        let mut sink = CollectSink::default();
        let mut dc = Decompressor::open(ContentEncoding::Gzip, &mut sink, None).unwrap();
        for byte in &wire {
            dc.write(std::slice::from_ref(byte)).unwrap();
        }
        dc.close().unwrap();
        assert_eq!(&sink.buf[..], b"some payload worth compressing, some payload");
    }

    #[test]
    fn test_deflate_sniffs_zlib_and_raw() {
        let payload = b"deflate me";

        let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(payload).unwrap();
        let zlib = enc.finish().unwrap();

        let mut enc = flate2::write::DeflateEncoder::new(Vec::new(), Compression::default());
        enc.write_all(payload).unwrap();
        let raw = enc.finish().unwrap();

        for wire in [zlib, raw] {
            let mut sink = CollectSink::default();
            let mut dc = Decompressor::open(ContentEncoding::Deflate, &mut sink, None).unwrap();
            dc.write(&wire).unwrap();
            dc.close().unwrap();
            assert_eq!(&sink.buf[..], payload);
        }
    }

    #[test]
    fn test_unregistered_codec_is_rejected() {
        let mut sink = CollectSink::default();
        assert!(Decompressor::open(ContentEncoding::Bzip2, &mut sink, None).is_err());
    }
}
