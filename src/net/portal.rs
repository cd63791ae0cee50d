//! Setup page served while the device is in AP mode.
//!
//! The HTTP handler (device only) parses the submitted form and hands
//! the credentials to a [`PortalChannel`]. The coordinator polls the
//! channel through the [`ProvisioningPortal`] trait and starts the
//! connection attempt itself.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use heapless::{String, Vec};

use super::Credentials;
use crate::config::{PASSWORD_MAX_LEN, SSID_MAX_LEN};

/// Source of credentials entered on the setup page.
pub trait ProvisioningPortal {
    /// Start accepting submissions.
    fn start(&mut self);

    /// Next submitted credentials, if any.
    fn poll_credentials(&mut self) -> Option<Credentials>;

    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// Single-slot hand-off between the HTTP task and the coordinator.
pub struct PortalChannel {
    submissions: Channel<CriticalSectionRawMutex, Credentials, 1>,
}

impl Default for PortalChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl PortalChannel {
    pub const fn new() -> Self {
        Self {
            submissions: Channel::new(),
        }
    }

    /// Offer a submission; a newer one replaces an unread older one.
    pub fn submit(&self, credentials: Credentials) {
        if self.submissions.try_send(credentials.clone()).is_err() {
            let _ = self.submissions.try_receive();
            let _ = self.submissions.try_send(credentials);
        }
    }

    pub fn portal(&self) -> ChannelPortal<'_> {
        ChannelPortal {
            channel: self,
            running: false,
        }
    }
}

/// [`ProvisioningPortal`] backed by a [`PortalChannel`].
pub struct ChannelPortal<'a> {
    channel: &'a PortalChannel,
    running: bool,
}

impl ProvisioningPortal for ChannelPortal<'_> {
    fn start(&mut self) {
        if !self.running {
            // Drop anything submitted before the page was up.
            self.channel.submissions.clear();
            self.running = true;
            info!("Portal: accepting submissions");
        }
    }

    fn poll_credentials(&mut self) -> Option<Credentials> {
        if !self.running {
            return None;
        }
        self.channel.submissions.try_receive().ok()
    }

    fn stop(&mut self) {
        if self.running {
            self.running = false;
            info!("Portal: stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

/// Decode `application/x-www-form-urlencoded` into a bounded string.
/// Malformed escapes are dropped; output that is not UTF-8 yields `None`.
pub fn url_decode<const N: usize>(s: &str) -> Option<String<N>> {
    let mut bytes: Vec<u8, N> = Vec::new();
    let mut it = s.bytes();
    while let Some(b) = it.next() {
        let out = match b {
            b'+' => b' ',
            b'%' => {
                let hi = it.next().and_then(hex_digit);
                let lo = it.next().and_then(hex_digit);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => (hi << 4) | lo,
                    _ => continue,
                }
            }
            other => other,
        };
        bytes.push(out).ok()?;
    }
    String::from_utf8(bytes).ok()
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Extract `ssid` and `password` from a submitted form body.
pub fn parse_form(body: &str) -> Option<Credentials> {
    let mut ssid: Option<String<SSID_MAX_LEN>> = None;
    let mut password: String<PASSWORD_MAX_LEN> = String::new();

    for pair in body.trim().split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        match key {
            "ssid" => ssid = Some(url_decode(value)?),
            "password" => password = url_decode(value)?,
            _ => {}
        }
    }

    // Open networks are not supported: stored credentials need both fields.
    if password.is_empty() {
        return None;
    }
    Credentials::new(ssid?.trim(), &password)
}

/// Body of an HTTP request (after the blank line), if present.
pub fn request_body(request: &str) -> Option<&str> {
    request.find("\r\n\r\n").map(|i| &request[i + 4..])
}

/// Accumulates one HTTP request across TCP reads.
///
/// A request is complete once the header block has ended and
/// `Content-Length` body bytes have followed it.
pub struct RequestBuffer<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> Default for RequestBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RequestBuffer<N> {
    pub const fn new() -> Self {
        Self { buf: [0; N], len: 0 }
    }

    /// Unfilled tail to read into; follow with [`advance`](Self::advance).
    pub fn spare(&mut self) -> &mut [u8] {
        &mut self.buf[self.len..]
    }

    pub fn advance(&mut self, n: usize) {
        self.len = (self.len + n).min(N);
    }

    /// Append `chunk`, returning how many bytes fit.
    pub fn push(&mut self, chunk: &[u8]) -> usize {
        let n = chunk.len().min(N - self.len);
        self.buf[self.len..self.len + n].copy_from_slice(&chunk[..n]);
        self.len += n;
        n
    }

    pub fn is_full(&self) -> bool {
        self.len == N
    }

    pub fn is_complete(&self) -> bool {
        let raw = &self.buf[..self.len];
        let Some(header_end) = raw.windows(4).position(|w| w == b"\r\n\r\n") else {
            return false;
        };
        let body = raw.len() - (header_end + 4);
        let headers = core::str::from_utf8(&raw[..header_end]).unwrap_or("");
        body >= content_length(headers)
    }

    pub fn as_str(&self) -> Option<&str> {
        core::str::from_utf8(&self.buf[..self.len]).ok()
    }
}

/// `Content-Length` of a header block; 0 when absent or malformed.
fn content_length(headers: &str) -> usize {
    headers
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

pub const SETUP_PAGE: &str = "HTTP/1.1 200 OK\r\n\
Content-Type: text/html\r\n\
Connection: close\r\n\
\r\n\
<!DOCTYPE html><html><head>\
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
<title>Knob setup</title>\
<style>body{font-family:sans-serif;max-width:420px;margin:40px auto;padding:16px}\
input{width:100%;padding:10px;margin:8px 0;box-sizing:border-box}\
button{width:100%;padding:12px;background:#00b5d6;color:#fff;border:0}</style>\
</head><body><h1>WiFi setup</h1>\
<form method=\"POST\" action=\"/setup\">\
<label for=\"ssid\">Network</label><input id=\"ssid\" name=\"ssid\" required>\
<label for=\"password\">Password</label><input id=\"password\" name=\"password\" type=\"password\" required>\
<button type=\"submit\">Connect</button></form></body></html>";

pub const SAVED_PAGE: &str = "HTTP/1.1 200 OK\r\n\
Content-Type: text/html\r\n\
Connection: close\r\n\
\r\n\
<!DOCTYPE html><html><body><h1>Saved</h1>\
<p>The knob is joining your network. You can close this page.</p></body></html>";

pub const BAD_REQUEST_PAGE: &str = "HTTP/1.1 400 Bad Request\r\n\
Content-Type: text/html\r\n\
Connection: close\r\n\
\r\n\
<!DOCTYPE html><html><body><h1>Invalid form</h1>\
<p><a href=\"/setup\">Try again</a></p></body></html>";

/// Pick the response for a raw HTTP request, forwarding valid
/// submissions to `channel`.
pub fn handle_request(request: &str, channel: &PortalChannel) -> &'static str {
    let method = request.split_whitespace().next().unwrap_or("");
    match method {
        "GET" => SETUP_PAGE,
        "POST" => match request_body(request).and_then(parse_form) {
            Some(credentials) => {
                info!("Portal: credentials for {}", credentials.ssid.as_str());
                channel.submit(credentials);
                SAVED_PAGE
            }
            None => {
                warn!("Portal: rejected form");
                BAD_REQUEST_PAGE
            }
        },
        _ => BAD_REQUEST_PAGE,
    }
}

#[cfg(feature = "embedded")]
pub use server::http_server;

#[cfg(feature = "embedded")]
mod server {
    use embassy_net::tcp::TcpSocket;
    use embassy_net::Stack;
    use embassy_time::{Duration, Timer};
    use embedded_io_async::Write as _;

    use super::{handle_request, PortalChannel, RequestBuffer};

    /// Serve the setup page on port 80 forever.
    pub async fn http_server(stack: Stack<'static>, channel: &'static PortalChannel) -> ! {
        let mut rx_buffer = [0u8; 1536];
        let mut tx_buffer = [0u8; 2048];

        loop {
            let mut socket = TcpSocket::new(stack, &mut rx_buffer, &mut tx_buffer);
            socket.set_timeout(Some(Duration::from_secs(20)));

            if let Err(e) = socket.accept(80).await {
                warn!("Portal: accept failed: {:?}", e);
                Timer::after_millis(500).await;
                continue;
            }

            let mut request: RequestBuffer<1024> = RequestBuffer::new();
            let mut received = true;
            while !request.is_complete() && !request.is_full() {
                match socket.read(request.spare()).await {
                    Ok(0) => break,
                    Ok(n) => request.advance(n),
                    Err(e) => {
                        warn!("Portal: read failed: {:?}", e);
                        received = false;
                        break;
                    }
                }
            }

            let response = if received {
                request.as_str().filter(|text| !text.is_empty()).map(|text| handle_request(text, channel))
            } else {
                None
            };

            if let Some(page) = response {
                if let Err(e) = socket.write_all(page.as_bytes()).await {
                    warn!("Portal: write failed: {:?}", e);
                }
            }
            let _ = socket.flush().await;
            socket.close();
            Timer::after_millis(50).await;
        }
    }
}
