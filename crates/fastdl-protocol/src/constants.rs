use std::time::Duration;

/// Leading bytes of every Source engine BSP file.
pub const MAP_MAGIC: [u8; 4] = *b"VBSP";

/// File name suffix the upload form accepts (compared case-insensitively).
pub const MAP_EXTENSION: &str = ".bsp";

/// Multipart field carrying the map file.
pub const FIELD_MAP: &str = "map";

/// Multipart field carrying the anti-forgery token.
pub const FIELD_CSRF_TOKEN: &str = "csrf_token";

/// Path of the progress WebSocket, relative to the upload page's host.
pub const PROGRESS_PATH: &str = "/progress";

/// Content type the upload request asks for so the server answers in JSON
/// instead of redirecting to an HTML page.
pub const ACCEPT_JSON: &str = "application/json";

/// Reason shown for every client-side validation rejection.
pub const INVALID_MAP_REASON: &str = "This does not appear to be a valid BSP.";

/// Reason shown when the upload never got a usable answer from the server.
pub const TRANSPORT_FAILURE_REASON: &str = "Upload failed: the server could not be reached.";

/// Reason shown when the server refused the upload without saying why.
pub const SERVER_FAILURE_REASON: &str = "The server rejected the upload.";

/// Largest progress frame accepted from the server.
///
/// Progress frames are a few dozen bytes; anything near this size is noise.
pub const WS_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Read deadline on the progress socket: if nothing (data, ping or pong)
/// arrives within this window the connection is considered dead.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// How often keepalive pings are sent. Must stay below [`WS_PONG_WAIT`].
pub const WS_PING_PERIOD: Duration = Duration::from_secs(20);
