//! Snapshot polling against a remote API server.

use anyhow::{Context, Result};
use async_trait::async_trait;
use pentest_runner::delivery::Snapshot;
use pentest_runner::follow::SnapshotSource;
use reqwest::{Client, Url};

use crate::views::TestDetail;

/// Fetches `GET /tests/{id}?after=N` pages for the follower.
pub struct HttpSnapshotSource {
    client: Client,
    url: Url,
}

impl HttpSnapshotSource {
    pub fn new(server: &str, test_id: &str) -> Result<Self> {
        let mut base = Url::parse(server).with_context(|| format!("parse server url {server}"))?;
        // Without a trailing slash `join` would replace the last path segment.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let url = base
            .join(&format!("tests/{test_id}"))
            .with_context(|| format!("build url for test {test_id}"))?;
        Ok(Self {
            client: Client::new(),
            url,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn fetch(&self, after: u64) -> Result<Snapshot> {
        let detail: TestDetail = self
            .client
            .get(self.url.clone())
            .query(&[("after", after)])
            .send()
            .await
            .with_context(|| format!("request {}", self.url))?
            .error_for_status()
            .with_context(|| format!("poll {}", self.url))?
            .json()
            .await
            .context("decode test snapshot")?;
        Ok(detail.into())
    }
}
