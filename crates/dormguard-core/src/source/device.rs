//! Best-effort call to the sensor to stop its own buzzer.

use reqwest::Client;
use url::Url;

use crate::error::SourceError;

/// `GET {device_url}/alert?state=off`.
pub async fn silence_device(client: &Client, device_url: &str) -> Result<(), SourceError> {
    let url = silence_url(device_url)?;
    let resp = client.get(url).send().await?;
    if resp.status().is_success() {
        Ok(())
    } else {
        Err(SourceError::Status {
            status: resp.status().as_u16(),
        })
    }
}

fn silence_url(device_url: &str) -> Result<Url, SourceError> {
    let base = device_url.trim().trim_end_matches('/');
    if base.is_empty() {
        return Err(SourceError::NotConfigured);
    }
    let mut url = Url::parse(&format!("{base}/alert"))
        .map_err(|e| SourceError::Decode(format!("invalid device url '{base}': {e}")))?;
    url.query_pairs_mut().append_pair("state", "off");
    Ok(url)
}
