//! HTTP/1.1 wire codec.
//!
//! An [`ExchangeCodec`] writes one request and reads one response over a
//! connection.  [`Http1Codec`] is the only implementation: request heads
//! are written in one buffer, response heads are read line by line, and
//! bodies are read in full (`Content-Length`, chunked, or until EOF).
//!
//! Every read and write is bounded by the call's read or write timeout.

use crate::body::RequestBody;
use crate::error::Error;
use crate::headers::{self, Headers};
use crate::protocol::Protocol;
use crate::request::Request;
use crate::tls::BoxedIo;
use crate::util::with_timeout;
use bytes::Bytes;
use http::{Method, StatusCode};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};

/// Response heads larger than this fail the exchange.
const HEADER_LIMIT: usize = 256 * 1024;

/// A parsed status line and header block.
#[derive(Debug, Clone)]
pub(crate) struct ResponseHead {
    pub(crate) protocol: Protocol,
    pub(crate) code: StatusCode,
    pub(crate) message: String,
    pub(crate) headers: Headers,
}

/// Writes requests and reads responses on one connection.
pub(crate) trait ExchangeCodec {
    /// Write the request line and headers.
    async fn write_request_headers(&mut self, request: &Request) -> crate::Result<()>;

    /// Write the request body.
    async fn write_request_body(&mut self, body: &RequestBody) -> crate::Result<()>;

    /// Flush everything written so far.
    async fn finish_request(&mut self) -> crate::Result<()>;

    /// Read the next status line and header block.
    async fn read_response_headers(&mut self) -> crate::Result<ResponseHead>;

    /// Read the body that follows `head`, answering `method`.
    async fn read_response_body(&mut self, head: &ResponseHead, method: &Method) -> crate::Result<Bytes>;

    /// `false` once the connection cannot carry another exchange.
    fn is_reusable(&self) -> bool;
}

/// HTTP/1.1 over a buffered stream.
pub(crate) struct Http1Codec<'c> {
    io: &'c mut BufReader<BoxedIo>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    /// Send the absolute URL on the request line (plain http via a proxy).
    absolute_form: bool,
    reusable: bool,
}

impl<'c> Http1Codec<'c> {
    pub(crate) fn new(
        io: &'c mut BufReader<BoxedIo>,
        read_timeout: Option<Duration>,
        write_timeout: Option<Duration>,
        absolute_form: bool,
    ) -> Self {
        Http1Codec {
            io,
            read_timeout,
            write_timeout,
            absolute_form,
            reusable: true,
        }
    }

    /// Write `request_line` and `headers` as one buffer.
    pub(crate) async fn write_head(&mut self, request_line: &str, headers: &Headers) -> crate::Result<()> {
        let mut head = Vec::with_capacity(request_line.len() + headers.byte_count() + 64);
        head.extend_from_slice(request_line.as_bytes());
        head.extend_from_slice(b"\r\n");
        for (name, value) in headers.iter() {
            head.extend_from_slice(name.as_bytes());
            head.extend_from_slice(b": ");
            head.extend_from_slice(value.as_bytes());
            head.extend_from_slice(b"\r\n");
        }
        head.extend_from_slice(b"\r\n");
        self.write_all(&head).await
    }

    async fn write_all(&mut self, data: &[u8]) -> crate::Result<()> {
        let io = &mut *self.io;
        with_timeout(self.write_timeout, "write", async move {
            io.write_all(data).await.map_err(Error::io)
        })
        .await
        .inspect_err(|_| self.reusable = false)
    }

    /// One line without its terminator.  `budget` is the number of head
    /// bytes still allowed and is reduced by what was read.
    async fn read_line(&mut self, budget: &mut usize) -> crate::Result<String> {
        let mut line = Vec::new();
        let io = &mut *self.io;
        let limit = *budget as u64;
        let n = with_timeout(self.read_timeout, "read", async {
            io.take(limit).read_until(b'\n', &mut line).await.map_err(Error::io)
        })
        .await?;
        if n == 0 {
            self.reusable = false;
            return Err(Error::io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "unexpected end of stream",
            )));
        }
        if line.last() != Some(&b'\n') {
            self.reusable = false;
            return Err(Error::protocol("response head too large or truncated"));
        }
        *budget -= n;
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    async fn read_exact(&mut self, len: usize, out: &mut Vec<u8>) -> crate::Result<()> {
        let start = out.len();
        out.resize(start + len, 0);
        let io = &mut *self.io;
        let buf = &mut out[start..];
        with_timeout(self.read_timeout, "read", async move {
            io.read_exact(buf).await.map(drop).map_err(Error::io)
        })
        .await
        .inspect_err(|_| self.reusable = false)
    }

    async fn read_chunked(&mut self) -> crate::Result<Bytes> {
        let mut out = Vec::new();
        loop {
            let mut budget = HEADER_LIMIT;
            let line = self.read_line(&mut budget).await?;
            let size = line.split(';').next().unwrap_or_default().trim();
            let size = u64::from_str_radix(size, 16)
                .ok()
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| {
                    self.reusable = false;
                    Error::protocol(format!("expected chunk size and optional extensions but was \"{line}\""))
                })?;
            if size == 0 {
                // Trailers are read and discarded.
                while !self.read_line(&mut budget).await?.is_empty() {}
                return Ok(Bytes::from(out));
            }
            self.read_exact(size, &mut out).await?;
            let crlf = self.read_line(&mut budget).await?;
            if !crlf.is_empty() {
                self.reusable = false;
                return Err(Error::protocol("chunk not followed by CRLF"));
            }
        }
    }

    async fn read_until_close(&mut self) -> crate::Result<Bytes> {
        self.reusable = false;
        let mut out = Vec::new();
        let io = &mut *self.io;
        with_timeout(self.read_timeout, "read", async {
            io.read_to_end(&mut out).await.map_err(Error::io)
        })
        .await?;
        Ok(Bytes::from(out))
    }
}

/// `true` if a response with `code` to `method` has no body whatever its
/// headers say.
fn has_no_body(code: StatusCode, method: &Method) -> bool {
    method == Method::HEAD
        || (method == Method::CONNECT && code.is_success())
        || code.is_informational()
        || code == StatusCode::NO_CONTENT
        || code == StatusCode::NOT_MODIFIED
}

/// Parse `HTTP/1.x CODE [MESSAGE]`.  `ICY` (Shoutcast) lines read as
/// HTTP/1.0.
pub(crate) fn parse_status_line(line: &str) -> crate::Result<(Protocol, StatusCode, String)> {
    let bad = || Error::protocol(format!("unexpected status line: {line}"));
    let (protocol, rest) = if let Some(rest) = line.strip_prefix("HTTP/1.") {
        let mut chars = rest.chars();
        let protocol = match chars.next() {
            Some('0') => Protocol::Http10,
            Some('1') => Protocol::Http11,
            _ => return Err(bad()),
        };
        (protocol, chars.as_str())
    } else if let Some(rest) = line.strip_prefix("ICY") {
        (Protocol::Http10, rest)
    } else {
        return Err(bad());
    };
    let rest = rest.strip_prefix(' ').ok_or_else(bad)?;
    let (code, message) = match rest.split_once(' ') {
        Some((code, message)) => (code, message),
        None => (rest, ""),
    };
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }
    let code = code.parse::<u16>().ok().and_then(|c| StatusCode::from_u16(c).ok()).ok_or_else(bad)?;
    Ok((protocol, code, message.to_owned()))
}

/// The request line for `request`.
fn request_line(request: &Request, absolute_form: bool) -> String {
    let target = if absolute_form {
        let url = request.url().as_str();
        url.split_once('#').map_or(url, |(before, _)| before)
    } else {
        request.url().request_target()
    };
    let target = if target.is_empty() { "/" } else { target };
    format!("{} {} HTTP/1.1", request.method(), target)
}

impl ExchangeCodec for Http1Codec<'_> {
    async fn write_request_headers(&mut self, request: &Request) -> crate::Result<()> {
        let line = request_line(request, self.absolute_form);
        trace!(line = %line, "writing request head");
        self.write_head(&line, request.headers()).await
    }

    async fn write_request_body(&mut self, body: &RequestBody) -> crate::Result<()> {
        self.write_all(body.bytes()).await
    }

    async fn finish_request(&mut self) -> crate::Result<()> {
        let io = &mut *self.io;
        with_timeout(self.write_timeout, "write", async move { io.flush().await.map_err(Error::io) })
            .await
            .inspect_err(|_| self.reusable = false)
    }

    async fn read_response_headers(&mut self) -> crate::Result<ResponseHead> {
        let mut budget = HEADER_LIMIT;
        let status = self.read_line(&mut budget).await?;
        let (protocol, code, message) = parse_status_line(&status).inspect_err(|_| self.reusable = false)?;
        let mut builder = headers::Builder::default();
        loop {
            let line = self.read_line(&mut budget).await?;
            if line.is_empty() {
                break;
            }
            builder = builder.add_line_lenient(&line);
        }
        Ok(ResponseHead {
            protocol,
            code,
            message,
            headers: builder.build(),
        })
    }

    async fn read_response_body(&mut self, head: &ResponseHead, method: &Method) -> crate::Result<Bytes> {
        if head.protocol == Protocol::Http10 {
            self.reusable = false;
        }
        if has_no_body(head.code, method) {
            return Ok(Bytes::new());
        }
        let chunked = head
            .headers
            .get("Transfer-Encoding")
            .is_some_and(|v| v.eq_ignore_ascii_case("chunked"));
        if chunked {
            return self.read_chunked().await;
        }
        if let Some(len) = head.headers.content_length() {
            let len = usize::try_from(len).map_err(|_| Error::protocol("Content-Length too large"))?;
            let mut out = Vec::with_capacity(len.min(1 << 20));
            self.read_exact(len, &mut out).await?;
            return Ok(Bytes::from(out));
        }
        self.read_until_close().await
    }

    fn is_reusable(&self) -> bool {
        self.reusable
    }
}
