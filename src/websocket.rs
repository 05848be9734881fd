//! WebSocket boundary.
//!
//! The engine does not speak the WebSocket protocol.  A client configured
//! with a [`WebSocketFactory`] hands [`Httpd::new_web_socket`] requests to
//! it; the factory typically performs the opening handshake with
//! [`Httpd::new_web_socket_call`], which runs the request through the
//! application and built-in stages but skips network interceptors.
//!
//! [`Httpd::new_web_socket`]: crate::Httpd::new_web_socket
//! [`Httpd::new_web_socket_call`]: crate::Httpd::new_web_socket_call

use crate::client::Httpd;
use crate::error::Error;
use crate::request::Request;
use crate::response::Response;
use bytes::Bytes;
use http::StatusCode;
use std::sync::Arc;

/// An open (or opening) WebSocket.
pub trait WebSocket: Send + Sync {
    /// The request that opened this socket.
    fn request(&self) -> &Request;

    /// Queue a text message.  `false` if the socket is closing or closed.
    fn send_text(&self, text: &str) -> bool;

    /// Queue a binary message.  `false` if the socket is closing or closed.
    fn send_binary(&self, bytes: Bytes) -> bool;

    /// Begin a graceful close.  `false` if a close was already started.
    fn close(&self, code: u16, reason: Option<&str>) -> bool;

    /// Drop the socket immediately, discarding queued messages.
    fn cancel(&self);
}

/// Receives WebSocket events.
#[allow(unused_variables)]
pub trait WebSocketListener: Send + Sync {
    /// The handshake succeeded.
    fn on_open(&self, web_socket: &dyn WebSocket, response: &Response) {}

    /// A text message arrived.
    fn on_text(&self, web_socket: &dyn WebSocket, text: &str) {}

    /// A binary message arrived.
    fn on_binary(&self, web_socket: &dyn WebSocket, bytes: &Bytes) {}

    /// The peer started a close.
    fn on_closing(&self, web_socket: &dyn WebSocket, code: u16, reason: &str) {}

    /// Both sides finished closing.
    fn on_closed(&self, web_socket: &dyn WebSocket, code: u16, reason: &str) {}

    /// The socket failed.  `response` is the handshake response, when one
    /// arrived.
    fn on_failure(&self, web_socket: &dyn WebSocket, error: &Error, response: Option<&Response>) {}
}

/// Opens WebSockets for a client.
pub trait WebSocketFactory: Send + Sync {
    /// Start opening a socket for `request`.  Events go to `listener`.
    fn new_web_socket(
        &self,
        client: &Httpd,
        request: Request,
        listener: Arc<dyn WebSocketListener>,
    ) -> crate::Result<Box<dyn WebSocket>>;
}

/// `request` with the headers of an opening handshake added.
///
/// `key` is the base64 `Sec-WebSocket-Key` nonce.
pub fn upgrade_request(request: &Request, key: &str) -> crate::Result<Request> {
    request
        .new_builder()
        .header("Upgrade", "websocket")
        .header("Connection", "Upgrade")
        .header("Sec-WebSocket-Key", key)
        .header("Sec-WebSocket-Version", "13")
        .build()
}

/// Check that `response` accepted an upgrade.
///
/// Verifying `Sec-WebSocket-Accept` needs SHA-1 and is left to the
/// factory.
pub fn check_upgrade_response(response: &Response) -> crate::Result<()> {
    if response.code() != StatusCode::SWITCHING_PROTOCOLS {
        return Err(Error::protocol(format!(
            "expected HTTP 101 response but was '{} {}'",
            response.code().as_u16(),
            response.message()
        )));
    }
    let header_is = |name: &str, expected: &str| {
        response
            .header(name)
            .is_some_and(|v| v.eq_ignore_ascii_case(expected))
    };
    if !header_is("Connection", "Upgrade") {
        return Err(Error::protocol(format!(
            "expected 'Connection' header value 'Upgrade' but was '{}'",
            response.header("Connection").unwrap_or("null")
        )));
    }
    if !header_is("Upgrade", "websocket") {
        return Err(Error::protocol(format!(
            "expected 'Upgrade' header value 'websocket' but was '{}'",
            response.header("Upgrade").unwrap_or("null")
        )));
    }
    Ok(())
}
