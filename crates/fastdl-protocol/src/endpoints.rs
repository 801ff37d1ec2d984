use url::Url;

use crate::ProtocolError;
use crate::constants::PROGRESS_PATH;

/// Derives the progress WebSocket URL from the upload page URL.
///
/// Same host and port, path [`PROGRESS_PATH`], scheme `wss` when the page is
/// served over `https` and `ws` otherwise.
pub fn progress_url(page: &Url) -> Result<Url, ProtocolError> {
    let scheme = match page.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(ProtocolError::UnsupportedScheme(other.to_string())),
    };

    let mut url = page.clone();
    url.set_scheme(scheme)
        .map_err(|()| ProtocolError::UnsupportedScheme(page.scheme().to_string()))?;
    url.set_path(PROGRESS_PATH);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}
