use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{SnapshotRequest, StreamService};
use crate::model::{StreamInfo, StreamSnapshot};
use crate::{Error, Result};

/// JetStream API error code for "stream name already in use".
const ERR_CODE_STREAM_NAME_IN_USE: u32 = 10058;
/// JetStream API error code for "stream not found".
const ERR_CODE_STREAM_NOT_FOUND: u32 = 10059;

#[derive(Debug, Clone)]
pub struct HttpStreamServiceConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout: Duration,
}

pub struct HttpStreamService {
    config: HttpStreamServiceConfig,
    base_url: Url,
    client: reqwest::Client,
}

impl HttpStreamService {
    pub fn new(config: HttpStreamServiceConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| Error::InvalidConfig {
            message: format!("service url {:?}: {e}", config.base_url),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(Error::InvalidConfig {
                message: format!("service url {:?} can not carry a path", config.base_url),
            });
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Service {
                message: format!("http client setup failed: {e}"),
            })?;
        Ok(Self {
            config,
            base_url,
            client,
        })
    }

    // Each segment is percent-encoded, so stream names can not alter the path.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        op: &str,
        req: reqwest::RequestBuilder,
    ) -> Result<T> {
        let res = self
            .authorize(req)
            .send()
            .await
            .map_err(|e| Error::Service {
                message: format!("{op} request failed: {e}"),
            })?;

        let status = res.status();
        let body = res.text().await.map_err(|e| Error::Service {
            message: format!("{op} read response failed: {e}"),
        })?;
        debug!(
            event = "io.service.response",
            op,
            status = status.as_u16(),
            "io.service.response"
        );

        if !status.is_success() {
            return Err(api_error(op, status, &body));
        }

        let parsed: ApiResponse<T> = serde_json::from_str(&body).map_err(|e| Error::Service {
            message: format!("{op} invalid json: {e}"),
        })?;
        match parsed {
            ApiResponse::Err { error } => Err(error.into_error(op)),
            ApiResponse::Ok(v) => Ok(v),
        }
    }
}

impl StreamService for HttpStreamService {
    fn provider(&self) -> &'static str {
        "http.gateway"
    }

    fn list_streams<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<StreamInfo>>> + Send + 'a>> {
        Box::pin(async move {
            let req = self.client.get(self.url(&["streams"]));
            let res: StreamListResponse = self.send("stream list", req).await?;
            Ok(res.streams)
        })
    }

    fn stream_names<'a>(
        &'a self,
        subject_filter: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + 'a>> {
        Box::pin(async move {
            let mut req = self.client.get(self.url(&["streams", "names"]));
            if let Some(subject) = subject_filter {
                req = req.query(&[("subject", subject)]);
            }
            let res: StreamNamesResponse = self.send("stream names", req).await?;
            Ok(res.streams)
        })
    }

    fn stream_info<'a>(
        &'a self,
        name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<StreamInfo>> + Send + 'a>> {
        Box::pin(async move {
            let req = self.client.get(self.url(&["streams", name]));
            self.send("stream info", req).await
        })
    }

    fn snapshot_stream<'a>(
        &'a self,
        name: &'a str,
        request: SnapshotRequest,
    ) -> Pin<Box<dyn Future<Output = Result<StreamSnapshot>> + Send + 'a>> {
        Box::pin(async move {
            let body = SnapshotBody {
                check_health: request.check_health,
                include_consumers: request.include_consumers,
            };
            let req = self
                .client
                .post(self.url(&["streams", name, "snapshot"]))
                .json(&body);
            self.send("stream snapshot", req).await
        })
    }

    fn restore_stream<'a>(
        &'a self,
        snapshot: StreamSnapshot,
    ) -> Pin<Box<dyn Future<Output = Result<StreamInfo>> + Send + 'a>> {
        Box::pin(async move {
            let stream = snapshot.config.name.clone();
            let req = self
                .client
                .post(self.url(&["streams", "restore"]))
                .json(&snapshot);
            self.send("stream restore", req).await.map_err(|e| match e {
                Error::StreamExists { .. } => Error::StreamExists { stream },
                other => other,
            })
        })
    }
}

fn api_error(op: &str, status: StatusCode, body: &str) -> Error {
    let envelope = match serde_json::from_str::<ApiResponse<serde_json::Value>>(body) {
        Ok(ApiResponse::Err { error }) => Some(error),
        _ => None,
    };

    if status == StatusCode::CONFLICT {
        return Error::StreamExists {
            stream: envelope.and_then(|e| e.stream).unwrap_or_default(),
        };
    }

    match envelope {
        Some(error) => {
            let mut err = error.into_error(op);
            if let Error::Service { message } = &mut err {
                message.push_str(&format!(" (status {})", status.as_u16()));
            }
            err
        }
        None => Error::Service {
            message: format!("{op} failed: status {}: {body}", status.as_u16()),
        },
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApiResponse<T> {
    Err { error: ApiError },
    Ok(T),
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: u16,
    #[serde(default)]
    err_code: u32,
    #[serde(default)]
    description: String,
    #[serde(default)]
    stream: Option<String>,
}

impl ApiError {
    fn into_error(self, op: &str) -> Error {
        let stream = self.stream.unwrap_or_default();
        match self.err_code {
            ERR_CODE_STREAM_NAME_IN_USE => Error::StreamExists { stream },
            ERR_CODE_STREAM_NOT_FOUND => Error::StreamNotFound { stream },
            _ => Error::Service {
                message: format!("{op} failed: {} (code {})", self.description, self.code),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamListResponse {
    #[serde(default)]
    streams: Vec<StreamInfo>,
}

#[derive(Debug, Deserialize)]
struct StreamNamesResponse {
    #[serde(default)]
    streams: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SnapshotBody {
    check_health: bool,
    include_consumers: bool,
}
