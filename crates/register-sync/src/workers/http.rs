use register_shared::types::AfterhandlerType;
use reqwest::{RequestBuilder, StatusCode};
use tracing::debug;

use crate::error::WorkerError;

/// Longest response body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Base URL plus shared client for one external system.
#[derive(Debug, Clone)]
pub(crate) struct HttpTarget {
    kind: AfterhandlerType,
    client: reqwest::Client,
    base_url: String,
}

impl HttpTarget {
    pub(crate) fn new(kind: AfterhandlerType, client: reqwest::Client, base_url: &str) -> Self {
        Self {
            kind,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Send `request`; any non-2xx status is an error unless it is a 404 and
    /// `allow_not_found` is set.
    pub(crate) async fn send(
        &self,
        request: RequestBuilder,
        allow_not_found: bool,
    ) -> Result<(), WorkerError> {
        let response = request.send().await.map_err(|source| WorkerError::Http {
            worker: self.kind,
            source,
        })?;

        let status = response.status();
        if status.is_success() || (allow_not_found && status == StatusCode::NOT_FOUND) {
            debug!(worker = %self.kind, url = %response.url(), %status, "External call ok");
            return Ok(());
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        Err(WorkerError::Status {
            worker: self.kind,
            status: status.as_u16(),
            body,
        })
    }
}
