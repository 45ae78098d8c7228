use bytes::{BufMut, BytesMut};

use super::Request;

impl Request {
    /// Serialize the request head (and body, when present) for the wire.
    ///
    /// The target is origin-form (`/escaped-path`), or absolute-form when
    /// the request travels through a proxy, in which case a
    /// `Proxy-Connection: keep-alive` header is inserted. `Host:` always
    /// follows the request line; caller headers go out verbatim, each
    /// terminated with CRLF unless already terminated.
    pub fn emit(&self, via_proxy: bool) -> BytesMut {
        let mut buf = BytesMut::with_capacity(256);

        buf.put_slice(self.method.as_str().as_bytes());
        buf.put_u8(b' ');
        if via_proxy {
            buf.put_slice(self.uri.scheme().as_str().as_bytes());
            buf.put_slice(b"://");
            buf.put_slice(self.uri.host_port().as_bytes());
        }
        buf.put_slice(self.uri.escaped_resource().as_bytes());
        buf.put_slice(b" HTTP/1.1\r\n");

        buf.put_slice(b"Host: ");
        buf.put_slice(self.uri.host_port().as_bytes());
        buf.put_slice(b"\r\n");

        for (name, value) in &self.headers {
            buf.put_slice(name.as_bytes());
            buf.put_slice(b": ");
            buf.put_slice(value.as_bytes());
            if !value.ends_with("\r\n") {
                buf.put_slice(b"\r\n");
            }
        }

        if via_proxy {
            buf.put_slice(b"Proxy-Connection: keep-alive\r\n");
        }

        buf.put_slice(b"\r\n");

        if let Some(body) = &self.body {
            buf.put_slice(body);
        }

        buf
    }
}
