//! HTTP backend for a relay (`bandcue serve`) or any service speaking the
//! same protocol: `GET/PUT/POST {base}/store/{path}` plus an SSE stream at
//! `{base}/watch/{path}`, all authenticated by a shared static secret in the
//! `auth` query parameter.

use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::watch;

use super::{split_path, RemoteStore, StoreWatch};
use crate::error::{store_err, CueResult};

#[derive(Clone)]
pub struct RestStore {
    client: Client,
    base: String,
    secret: String,
}

#[derive(Deserialize)]
struct PushResp {
    name: String,
}

impl RestStore {
    pub fn new(base: impl Into<String>, secret: impl Into<String>) -> Self {
        let base: String = base.into();
        Self {
            client: Client::new(),
            base: base.trim_end_matches('/').to_string(),
            secret: secret.into(),
        }
    }

    fn url(&self, kind: &str, path: &str) -> String {
        format!(
            "{}/{}/{}?auth={}",
            self.base,
            kind,
            path.trim_matches('/'),
            self.secret
        )
    }

    async fn check(resp: reqwest::Response, path: &str) -> CueResult<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(store_err(format!("{path}: {status} {body}")))
    }
}

impl RemoteStore for RestStore {
    async fn read(&self, path: &str) -> CueResult<Value> {
        split_path(path)?;
        let resp = self.client.get(self.url("store", path)).send().await?;
        Ok(Self::check(resp, path).await?.json().await?)
    }

    async fn write(&self, path: &str, value: Value) -> CueResult<()> {
        split_path(path)?;
        let resp = self
            .client
            .put(self.url("store", path))
            .json(&value)
            .send()
            .await?;
        Self::check(resp, path).await?;
        Ok(())
    }

    async fn append(&self, path: &str, value: Value) -> CueResult<String> {
        split_path(path)?;
        let resp = self
            .client
            .post(self.url("store", path))
            .json(&value)
            .send()
            .await?;
        let pushed: PushResp = Self::check(resp, path).await?.json().await?;
        Ok(pushed.name)
    }

    async fn subscribe(&self, path: &str) -> CueResult<StoreWatch> {
        split_path(path)?;
        let resp = self.client.get(self.url("watch", path)).send().await?;
        let resp = Self::check(resp, path).await?;

        let (tx, rx) = watch::channel(Value::Null);
        let path = path.to_string();
        tokio::spawn(async move {
            let mut stream = resp.bytes_stream();
            let mut buf: Vec<u8> = Vec::new();
            while let Some(chunk) = stream.next().await {
                let chunk: Bytes = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::warn!("watch {path}: stream error: {e}");
                        break;
                    }
                };
                buf.extend_from_slice(&chunk);
                drain_frames(&mut buf, &tx);
                if tx.is_closed() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}

/// Consumes complete SSE frames (terminated by a blank line) from `buf` and
/// forwards each `data:` payload to the watch channel.
fn drain_frames(buf: &mut Vec<u8>, tx: &watch::Sender<Value>) {
    while let Some(pos) = buf.windows(2).position(|w| w == b"\n\n") {
        let frame: Vec<u8> = buf.drain(..pos + 2).collect();
        let text = String::from_utf8_lossy(&frame);
        for line in text.lines() {
            let Some(data) = line.strip_prefix("data:") else {
                continue; // event names and keep-alive comments
            };
            match serde_json::from_str::<Value>(data.trim_start()) {
                Ok(v) => {
                    tx.send_replace(v);
                }
                Err(e) => tracing::warn!("bad watch frame: {e}"),
            }
        }
    }
}
