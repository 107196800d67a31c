use std::collections::VecDeque;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_lite::{stream, StreamExt};
use log::{debug, info};
use reqwest::{header, RequestBuilder, Url};
use serde::Deserialize;

use crate::export::SavedRecord;
use crate::models::{parse_status, AvailableExperiment, DeviceStatus, ExperimentKind};

use super::{ConfigureRequest, EventStream, SensorBridge, SseDecoder};

#[derive(Deserialize)]
struct ExperimentList {
    #[serde(default)]
    experiments: Vec<AvailableExperiment>,
}

/// HTTP client for one experiment's endpoints on the sensor bridge.
///
/// REST calls carry the token as a bearer credential. The stream cannot carry
/// custom headers on the browser side, so the bridge expects it as a `token`
/// query parameter there and we do the same.
#[derive(Clone)]
pub struct BridgeClient {
    http: reqwest::Client,
    base_url: String,
    experiment: ExperimentKind,
    token: Option<String>,
}

impl BridgeClient {
    pub fn new(
        base_url: impl Into<String>,
        experiment: ExperimentKind,
        token: Option<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("failed to build HTTP client")?;

        let token = token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty() && t != "undefined" && t != "null");

        Ok(Self {
            http,
            base_url: base_url.into(),
            experiment,
            token,
        })
    }

    pub fn endpoint(&self, path: &str) -> Result<Url> {
        let raw = format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.experiment.endpoint_prefix(),
            path
        );
        Url::parse(&raw).with_context(|| format!("invalid bridge url '{raw}'"))
    }

    pub fn stream_url(&self) -> Result<Url> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| anyhow!("no auth token for stream"))?;
        let mut url = self.endpoint("stream")?;
        url.query_pairs_mut().append_pair("token", token);
        Ok(url)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn post_empty(&self, path: &str) -> Result<()> {
        let url = self.endpoint(path)?;
        self.authorized(self.http.post(url))
            .send()
            .await
            .with_context(|| format!("bridge {path} request failed"))?
            .error_for_status()
            .with_context(|| format!("bridge rejected {path}"))?;
        Ok(())
    }
}

#[async_trait]
impl SensorBridge for BridgeClient {
    fn experiment(&self) -> ExperimentKind {
        self.experiment
    }

    fn has_credentials(&self) -> bool {
        self.token.is_some()
    }

    async fn status(&self) -> Result<DeviceStatus> {
        let url = self.endpoint("status")?;
        let body = self
            .authorized(self.http.get(url))
            .send()
            .await
            .context("bridge status request failed")?
            .error_for_status()
            .context("bridge status check failed")?
            .text()
            .await
            .context("failed to read bridge status body")?;
        parse_status(&body)
    }

    async fn configure(&self, request: &ConfigureRequest) -> Result<()> {
        let url = self.endpoint("configure")?;
        self.authorized(self.http.post(url))
            .json(request)
            .send()
            .await
            .context("bridge configure request failed")?
            .error_for_status()
            .context("bridge rejected configuration")?;
        info!(
            "Configured {} run: {}Hz for {}s",
            self.experiment.as_str(),
            request.frequency,
            request.duration
        );
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.post_empty("start").await
    }

    async fn stop(&self) -> Result<()> {
        self.post_empty("stop").await
    }

    async fn reset(&self) -> Result<()> {
        self.post_empty("reset").await
    }

    async fn open_stream(&self) -> Result<EventStream> {
        let url = self.stream_url()?;
        debug!("Opening {} stream", self.experiment.as_str());

        let response = self
            .http
            .get(url)
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await
            .context("stream connection failed")?
            .error_for_status()
            .context("bridge refused stream")?;

        let body = response.bytes_stream().boxed();
        let seed = (body, SseDecoder::new(), VecDeque::<String>::new());

        let events = stream::unfold(seed, |(mut body, mut decoder, mut ready)| async move {
            loop {
                if let Some(payload) = ready.pop_front() {
                    return Some((Ok(payload), (body, decoder, ready)));
                }
                match body.next().await {
                    Some(Ok(chunk)) => ready.extend(decoder.feed(&chunk)),
                    Some(Err(err)) => {
                        let err = anyhow::Error::new(err).context("stream read failed");
                        return Some((Err(err), (body, decoder, ready)));
                    }
                    None => return None,
                }
            }
        });

        Ok(events.boxed())
    }

    async fn save_data(&self, record: &SavedRecord) -> Result<()> {
        let url = self.endpoint("save_data")?;
        self.authorized(self.http.post(url))
            .json(record)
            .send()
            .await
            .context("save_data request failed")?
            .error_for_status()
            .context("bridge rejected saved data")?;
        Ok(())
    }

    async fn available_experiments(&self) -> Result<Vec<AvailableExperiment>> {
        let url = self.endpoint("available_experiments")?;
        let list: ExperimentList = self
            .authorized(self.http.get(url))
            .send()
            .await
            .context("available_experiments request failed")?
            .error_for_status()
            .context("bridge rejected available_experiments")?
            .json()
            .await
            .context("malformed available_experiments response")?;
        Ok(list.experiments)
    }

    async fn select_experiment(&self, experiment_type: &str) -> Result<()> {
        let url = self.endpoint("select_experiment")?;
        self.authorized(self.http.post(url))
            .json(&serde_json::json!({ "experiment_type": experiment_type }))
            .send()
            .await
            .context("select_experiment request failed")?
            .error_for_status()
            .context("bridge rejected experiment selection")?;
        Ok(())
    }
}
