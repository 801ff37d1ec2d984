//! Anti-forgery token discovery.
//!
//! The upload page embeds the token in a hidden form field
//! (`<input id="csrf_token" name="csrf_token" value="...">`); the upload
//! request must echo it back.

use anyhow::Context;
use reqwest::header::COOKIE;
use scraper::{Html, Selector};
use url::Url;

use fastdl_protocol::constants::FIELD_CSRF_TOKEN;

/// Pulls the token out of the upload page's HTML.
pub fn extract_csrf_token(html: &str) -> Option<String> {
    let selector =
        Selector::parse(&format!("input#{FIELD_CSRF_TOKEN}, input[name=\"{FIELD_CSRF_TOKEN}\"]"))
            .ok()?;
    let doc = Html::parse_document(html);

    doc.select(&selector)
        .filter_map(|input| input.value().attr("value"))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

/// Fetches the upload page and extracts its token.
pub async fn fetch_csrf_token(
    http: &reqwest::Client,
    page: &Url,
    cookie: Option<&str>,
) -> anyhow::Result<String> {
    let mut req = http.get(page.clone());
    if let Some(cookie) = cookie {
        req = req.header(COOKIE, cookie);
    }

    let resp = req
        .send()
        .await
        .with_context(|| format!("fetching upload page {page}"))?;
    let status = resp.status();
    if !status.is_success() {
        anyhow::bail!("upload page {page} returned HTTP {}", status.as_u16());
    }
    let html = resp.text().await?;

    let token = extract_csrf_token(&html).with_context(|| {
        format!("no {FIELD_CSRF_TOKEN} field on {page}; are you logged in (--cookie)?")
    })?;
    tracing::debug!(page = %page, "anti-forgery token found");
    Ok(token)
}
