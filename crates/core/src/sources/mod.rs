//! Adapters for the upstream deck-building sites.
//!
//! Each adapter turns one site's pagination and payload shapes into
//! the uniform [`DeckSource`] contract: one fetch per call, normalized
//! summaries and card entries out, and a captured upstream response on
//! every failure so run notes show exactly what the server sent.

mod archidekt;
mod moxfield;
mod types;

pub use archidekt::ArchidektSource;
pub use moxfield::MoxfieldSource;
pub use types::{
    CardEntry, DeckSource, DeckSummary, Source, SourceError, SummaryPage, UpstreamResponse,
};

use reqwest::Client;
use types::map_transport_error;

/// User-Agent sent with every upstream request, as the sites ask of
/// well-behaved crawlers.
pub(crate) fn user_agent() -> String {
    format!("uncommander/{}", env!("CARGO_PKG_VERSION"))
}

/// GET `url` and capture the whole response. Transport failures map
/// onto the adapter error type; status handling stays with the caller.
pub(crate) async fn capture_response(
    client: &Client,
    url: &str,
) -> Result<UpstreamResponse, SourceError> {
    let response = client.get(url).send().await.map_err(map_transport_error)?;

    let status = response.status().as_u16();
    let final_url = response.url().to_string();
    let headers = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    let body = response.text().await.map_err(map_transport_error)?;

    Ok(UpstreamResponse {
        status,
        url: final_url,
        headers,
        body,
    })
}

/// Decode a 2xx payload, folding decode failures into the captured
/// response so the diagnostic shows what the server actually sent.
pub(crate) fn parse_payload<T: serde::de::DeserializeOwned>(
    captured: &UpstreamResponse,
) -> Result<T, SourceError> {
    serde_json::from_str(&captured.body).map_err(|e| SourceError::Upstream {
        message: format!("unparseable payload: {}", e),
        response: captured.clone(),
    })
}
