//! `BottleBackend` over the local backend's HTTP/JSON API, with push events
//! read from its websocket.

use std::{path::Path, sync::Arc};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{
        Bottle, BottleId, BottleTemplate, DetectedApp, EnvironmentKind, GraphicsBackend,
        RegisteredApp, WineRunner,
    },
    error::{ApiError, ApiException},
    protocol::{
        CreateBottleRequest, EngineReadinessResponse, GraphicsLibrariesResponse, PinAppRequest,
        PushEvent, RenameBottleRequest, RunExecutableRequest, SetCoverRequest, SetEngineRequest,
        SetGraphicsBackendRequest, UnpinAppQuery,
    },
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::BottleBackend;

pub struct HttpBackend {
    http: Client,
    base_url: Url,
    events: broadcast::Sender<PushEvent>,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl HttpBackend {
    pub fn new(base_url: &str) -> Result<Arc<Self>> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("invalid backend url: {base_url}"))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            bail!("backend url must start with http:// or https://");
        }
        if base_url.cannot_be_a_base() {
            bail!("backend url cannot carry a path: {base_url}");
        }
        let (events, _) = broadcast::channel(256);
        Ok(Arc::new(Self {
            http: Client::new(),
            base_url,
            events,
            event_task: Mutex::new(None),
        }))
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Opens the push-event websocket and rebroadcasts every decoded event to
    /// [`BottleBackend::subscribe_events`] receivers. Calling it again while
    /// the reader is alive does nothing.
    pub async fn connect_events(&self) -> Result<()> {
        let mut task = self.event_task.lock().await;
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }

        let ws_url = self.events_url()?;
        let (ws_stream, _) = connect_async(ws_url.as_str())
            .await
            .with_context(|| format!("failed to connect websocket: {ws_url}"))?;
        let (_, mut ws_reader) = ws_stream.split();
        info!(url = %ws_url, "push event stream connected");

        let events = self.events.clone();
        *task = Some(tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<PushEvent>(&text) {
                        Ok(event) => {
                            debug!(channel = event.channel(), "push event");
                            let _ = events.send(event);
                        }
                        Err(err) => warn!(error = %err, "invalid push event"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!(error = %err, "push event stream failed");
                        break;
                    }
                }
            }
            info!("push event stream closed");
        }));
        Ok(())
    }

    pub async fn disconnect_events(&self) {
        if let Some(handle) = self.event_task.lock().await.take() {
            handle.abort();
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("backend url cannot carry a path: {}", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn bottle_endpoint(&self, bottle_id: &BottleId, rest: &[&str]) -> Result<Url> {
        let mut segments = vec!["bottles", bottle_id.as_str()];
        segments.extend_from_slice(rest);
        self.endpoint(&segments)
    }

    fn events_url(&self) -> Result<Url> {
        let mut url = self.endpoint(&["events"])?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| anyhow!("cannot derive websocket url from {}", self.base_url))?;
        Ok(url)
    }

    async fn send(&self, operation: &'static str, request: RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .await
            .with_context(|| format!("{operation}: backend unreachable"))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        debug!(operation, %status, "backend rejected request");
        match serde_json::from_str::<ApiError>(&body) {
            Ok(api_error) => Err(ApiException::from(api_error).into()),
            Err(_) if body.trim().is_empty() => Err(anyhow!("{operation}: backend returned {status}")),
            Err(_) => Err(anyhow!("{operation}: backend returned {status}: {}", body.trim())),
        }
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<T> {
        self.send(operation, request)
            .await?
            .json()
            .await
            .with_context(|| format!("{operation}: malformed response body"))
    }
}

#[async_trait]
impl BottleBackend for HttpBackend {
    async fn list_bottles(&self) -> Result<Vec<Bottle>> {
        let url = self.endpoint(&["bottles"])?;
        self.send_json("list bottles", self.http.get(url)).await
    }

    async fn bottle_detail(&self, bottle_id: &BottleId) -> Result<Bottle> {
        let url = self.bottle_endpoint(bottle_id, &[])?;
        self.send_json("get bottle detail", self.http.get(url)).await
    }

    async fn create_bottle(&self, name: &str, environment: EnvironmentKind) -> Result<Bottle> {
        let url = self.endpoint(&["bottles"])?;
        let body = CreateBottleRequest {
            name: name.to_string(),
            environment,
        };
        self.send_json("create bottle", self.http.post(url).json(&body))
            .await
    }

    async fn delete_bottle(&self, bottle_id: &BottleId) -> Result<()> {
        let url = self.bottle_endpoint(bottle_id, &[])?;
        self.send("delete bottle", self.http.delete(url)).await?;
        Ok(())
    }

    async fn rename_bottle(&self, bottle_id: &BottleId, new_name: &str) -> Result<()> {
        let url = self.bottle_endpoint(bottle_id, &["name"])?;
        let body = RenameBottleRequest {
            name: new_name.to_string(),
        };
        self.send("rename bottle", self.http.put(url).json(&body))
            .await?;
        Ok(())
    }

    async fn set_bottle_cover(&self, bottle_id: &BottleId, cover: &str) -> Result<()> {
        let url = self.bottle_endpoint(bottle_id, &["cover"])?;
        let body = SetCoverRequest {
            cover: cover.to_string(),
        };
        self.send("set bottle cover", self.http.put(url).json(&body))
            .await?;
        Ok(())
    }

    async fn scan_installed_apps(&self, bottle_id: &BottleId) -> Result<Vec<DetectedApp>> {
        let url = self.bottle_endpoint(bottle_id, &["apps", "scan"])?;
        self.send_json("scan installed apps", self.http.get(url))
            .await
    }

    async fn pin_app(&self, bottle_id: &BottleId, app: &RegisteredApp) -> Result<()> {
        let url = self.bottle_endpoint(bottle_id, &["apps", "pinned"])?;
        let body = PinAppRequest { app: app.clone() };
        self.send("pin app", self.http.post(url).json(&body)).await?;
        Ok(())
    }

    async fn unpin_app(&self, bottle_id: &BottleId, exe_path: &str) -> Result<()> {
        let url = self.bottle_endpoint(bottle_id, &["apps", "pinned"])?;
        let query = UnpinAppQuery {
            exe_path: exe_path.to_string(),
        };
        self.send("unpin app", self.http.delete(url).query(&query))
            .await?;
        Ok(())
    }

    async fn set_bottle_engine(&self, bottle_id: &BottleId, engine_path: &Path) -> Result<()> {
        let url = self.bottle_endpoint(bottle_id, &["engine"])?;
        let body = SetEngineRequest {
            engine_path: engine_path.to_path_buf(),
        };
        self.send("set bottle engine", self.http.put(url).json(&body))
            .await?;
        Ok(())
    }

    async fn reset_bottle_engine(&self, bottle_id: &BottleId) -> Result<()> {
        let url = self.bottle_endpoint(bottle_id, &["engine"])?;
        self.send("reset bottle engine", self.http.delete(url))
            .await?;
        Ok(())
    }

    async fn initialize_bottle_runtime(&self, bottle_id: &BottleId) -> Result<()> {
        let url = self.bottle_endpoint(bottle_id, &["initialize"])?;
        self.send("initialize bottle runtime", self.http.post(url))
            .await?;
        Ok(())
    }

    async fn install_template_dependency(&self, bottle_id: &BottleId) -> Result<()> {
        let url = self.bottle_endpoint(bottle_id, &["template-dependency"])?;
        self.send("install template dependency", self.http.post(url))
            .await?;
        Ok(())
    }

    async fn run_executable(&self, path: &str, bottle_id: &BottleId) -> Result<()> {
        let url = self.bottle_endpoint(bottle_id, &["run"])?;
        let body = RunExecutableRequest {
            path: path.to_string(),
        };
        self.send("run executable", self.http.post(url).json(&body))
            .await?;
        Ok(())
    }

    async fn list_runner_candidates(&self) -> Result<Vec<WineRunner>> {
        let url = self.endpoint(&["runners"])?;
        self.send_json("list runner candidates", self.http.get(url))
            .await
    }

    async fn list_templates(&self) -> Result<Vec<BottleTemplate>> {
        let url = self.endpoint(&["templates"])?;
        self.send_json("list templates", self.http.get(url)).await
    }

    async fn check_engine_readiness(&self) -> Result<bool> {
        let url = self.endpoint(&["engine", "status"])?;
        let body: EngineReadinessResponse = self
            .send_json("check engine readiness", self.http.get(url))
            .await?;
        Ok(body.ready)
    }

    async fn deploy_engine(&self) -> Result<()> {
        let url = self.endpoint(&["engine", "deploy"])?;
        self.send("deploy engine", self.http.post(url)).await?;
        Ok(())
    }

    async fn repair_graphics_runtime(&self, bottle_id: &BottleId) -> Result<()> {
        let url = self.bottle_endpoint(bottle_id, &["repair"])?;
        self.send("repair graphics runtime", self.http.post(url))
            .await?;
        Ok(())
    }

    async fn verify_metal_libraries(&self, bottle_id: &BottleId) -> Result<bool> {
        let url = self.bottle_endpoint(bottle_id, &["graphics", "metal"])?;
        let body: GraphicsLibrariesResponse = self
            .send_json("verify metal libraries", self.http.get(url))
            .await?;
        Ok(body.installed)
    }

    async fn install_metal_libraries(&self, bottle_id: &BottleId) -> Result<()> {
        let url = self.bottle_endpoint(bottle_id, &["graphics", "metal"])?;
        self.send("install metal libraries", self.http.post(url))
            .await?;
        Ok(())
    }

    async fn set_graphics_backend(
        &self,
        bottle_id: &BottleId,
        backend: GraphicsBackend,
    ) -> Result<()> {
        let url = self.bottle_endpoint(bottle_id, &["graphics", "backend"])?;
        let body = SetGraphicsBackendRequest { backend };
        self.send("set graphics backend", self.http.put(url).json(&body))
            .await?;
        Ok(())
    }

    async fn open_bottle_dir(&self, bottle_id: &BottleId) -> Result<()> {
        let url = self.bottle_endpoint(bottle_id, &["open"])?;
        self.send("open bottle directory", self.http.post(url))
            .await?;
        Ok(())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<PushEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
#[path = "tests/http_backend_tests.rs"]
mod tests;
