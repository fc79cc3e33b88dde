//! Upstream phishing-feed formats.
//!
//! Fetches are soft-failing: a dead feed logs a warning and contributes
//! nothing to the batch, so one upstream outage never stalls the poll loop.

use std::str::FromStr;

use anyhow::bail;
use reqwest::Client;
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedSource {
    OpenPhish,
    SinkingYachts,
}

impl FeedSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedSource::OpenPhish => "openphish",
            FeedSource::SinkingYachts => "sinkingyachts",
        }
    }
}

impl FromStr for FeedSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openphish" => Ok(FeedSource::OpenPhish),
            "sinkingyachts" => Ok(FeedSource::SinkingYachts),
            other => bail!("unknown feed source: {}", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeedItem {
    pub url: String,
    pub source: FeedSource,
}

/// OpenPhish publishes a plain-text body, one URL per line.
pub async fn fetch_openphish(client: &Client, feed_url: &str) -> Vec<FeedItem> {
    let body = match fetch_text(client, feed_url).await {
        Ok(body) => body,
        Err(e) => {
            warn!(source = "openphish", error = %e, "feed fetch failed");
            return Vec::new();
        }
    };
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| FeedItem {
            url: line.to_string(),
            source: FeedSource::OpenPhish,
        })
        .collect()
}

#[derive(Deserialize)]
struct SinkingYachtsEntry {
    url: String,
}

/// SinkingYachts serves a JSON array of `{ "url": ... }` objects; `per_page`
/// bounds how much we pull per poll.
pub async fn fetch_sinkingyachts(client: &Client, feed_url: &str, per_page: usize) -> Vec<FeedItem> {
    let result = async {
        let resp = client
            .get(feed_url)
            .query(&[("per_page", per_page.to_string())])
            .send()
            .await?;
        anyhow::ensure!(resp.status().is_success(), "status {}", resp.status());
        let entries: Vec<SinkingYachtsEntry> = resp.json().await?;
        anyhow::Ok(entries)
    }
    .await;
    match result {
        Ok(entries) => entries
            .into_iter()
            .filter(|e| !e.url.trim().is_empty())
            .map(|e| FeedItem {
                url: e.url,
                source: FeedSource::SinkingYachts,
            })
            .collect(),
        Err(e) => {
            warn!(source = "sinkingyachts", error = %e, "feed fetch failed");
            Vec::new()
        }
    }
}

async fn fetch_text(client: &Client, feed_url: &str) -> anyhow::Result<String> {
    let resp = client.get(feed_url).send().await?;
    anyhow::ensure!(resp.status().is_success(), "status {}", resp.status());
    Ok(resp.text().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_names_roundtrip() {
        for s in [FeedSource::OpenPhish, FeedSource::SinkingYachts] {
            assert_eq!(s.as_str().parse::<FeedSource>().unwrap(), s);
        }
        assert!("phishtank".parse::<FeedSource>().is_err());
    }
}
