//! Response container handed to the data receiver.

use crate::headers::Headers;

/// One HTTP response, or one progressive slice of a chunked response.
///
/// The connection driver owns the response while it assembles it; the
/// application receives it by value and it is dropped when the callback
/// returns. Chunked transfers deliver a clone per chunk with `done ==
/// false` and cumulative `content`, then a final delivery with `done ==
/// true`.
#[derive(Clone, Debug, Default)]
pub struct Response {
    /// Protocol version from the status line, e.g. `HTTP/1.1`.
    pub version: String,
    pub status_code: u16,
    pub status_message: String,
    /// All response headers except `Set-Cookie`, last-write-wins.
    pub headers: Headers,
    /// Every `Set-Cookie` header, in arrival order.
    pub set_cookies: Vec<String>,
    /// Body bytes accumulated so far.
    pub content: Vec<u8>,
    /// Whether this delivery completes the response.
    pub done: bool,
}

impl Response {
    /// Body as UTF-8, lossily converted.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }

    /// Whether the server asked for the connection to be torn down after
    /// this response.
    pub fn wants_close(&self) -> bool {
        self.headers.value_equals("Connection", "close")
    }
}
