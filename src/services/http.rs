//! JSON client for the analysis backend.
//!
//! One base URL serves analysis, news and job endpoints:
//!
//! | Call | Endpoint |
//! |---|---|
//! | `analyze_symbol` | `POST /analysis/symbol` |
//! | `monitor_position` | `POST /analysis/position` |
//! | `analyze_universe` | `POST /analysis/universe` |
//! | `recent` | `GET /news/{symbol}?days=n` |
//! | `list_jobs` | `GET /jobs` |
//! | `trigger` | `POST /jobs/{name}/run` |
//! | `history` | `GET /jobs/history?limit=n` |

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::context::TaskContext;
use crate::error::{Cancelled, CollaboratorError, ConfigError, Error, NotFoundError, Result};
use crate::services::{
    AnalysisResult, AnalyzerService, Interval, JobInfo, JobRun, JobStore, NewsItem, NewsService,
    PositionRequest, PositionResult, Range, SummaryResult,
};

const SERVICE: &str = "backend";

/// reqwest client bound to the backend base URL.
pub struct HttpBackend {
    base_url: Url,
    client: reqwest::Client,
    /// Bound for calls that carry no `TaskContext` (job control).
    request_timeout: Duration,
}

impl HttpBackend {
    /// `client` is shared with the rest of the process so connections are
    /// pooled once.
    pub fn new(
        base_url: &str,
        client: reqwest::Client,
        request_timeout: Duration,
    ) -> std::result::Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: "STOCK_ASSIST_BACKEND_URL".into(),
            message,
        };
        let base_url = Url::parse(base_url).map_err(|e| invalid(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(invalid(format!("{base_url} cannot carry a path")));
        }
        Ok(Self {
            base_url,
            client,
            request_timeout,
        })
    }

    /// Base URL plus `segments`, each percent-encoded as a single path
    /// segment so caller text cannot change the route.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // Only fails for cannot-be-a-base URLs, rejected in `new`.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn decode<T: DeserializeOwned>(url: &Url, response: reqwest::Response) -> Result<T> {
        let path = url.path();
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::RequestFailed {
                service: SERVICE.into(),
                reason: format!("{path} returned {status}: {body}"),
            }
            .into());
        }
        response.json::<T>().await.map_err(|e| {
            CollaboratorError::InvalidResponse {
                service: SERVICE.into(),
                reason: format!("{path}: {e}"),
            }
            .into()
        })
    }

    async fn post_json<B, T>(&self, ctx: &TaskContext, url: Url, body: &B) -> Result<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let request = self.client.post(url.clone()).json(body).send();
        let response = ctx.run(request).await?.map_err(request_failed)?;
        Self::decode(&url, response).await
    }

    async fn get_json<T>(&self, ctx: &TaskContext, url: Url) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let request = self.client.get(url.clone()).send();
        let response = ctx.run(request).await?.map_err(request_failed)?;
        Self::decode(&url, response).await
    }

    fn job_ctx(&self) -> TaskContext {
        TaskContext::detached().with_timeout(self.request_timeout)
    }

    /// Job calls carry their own deadline, so expiry is the backend's fault.
    fn job_cancelled(&self, reason: Cancelled) -> Error {
        match reason {
            Cancelled::Deadline => CollaboratorError::Timeout {
                service: SERVICE.into(),
                timeout: self.request_timeout,
            }
            .into(),
            Cancelled::Shutdown => reason.into(),
        }
    }

    async fn get_job_json<T>(&self, url: Url) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let ctx = self.job_ctx();
        let request = self.client.get(url.clone()).send();
        let response = ctx
            .run(request)
            .await
            .map_err(|c| self.job_cancelled(c))?
            .map_err(request_failed)?;
        Self::decode(&url, response).await
    }
}

fn request_failed(e: reqwest::Error) -> Error {
    CollaboratorError::RequestFailed {
        service: SERVICE.into(),
        reason: e.to_string(),
    }
    .into()
}

#[async_trait]
impl AnalyzerService for HttpBackend {
    async fn analyze_symbol(
        &self,
        ctx: &TaskContext,
        symbol: &str,
        interval: Interval,
        range: Range,
    ) -> Result<AnalysisResult> {
        let body = json!({ "symbol": symbol, "interval": interval, "range": range });
        self.post_json(ctx, self.endpoint(&["analysis", "symbol"]), &body).await
    }

    async fn monitor_position(
        &self,
        ctx: &TaskContext,
        request: PositionRequest,
    ) -> Result<PositionResult> {
        self.post_json(ctx, self.endpoint(&["analysis", "position"]), &request).await
    }

    async fn analyze_universe(
        &self,
        ctx: &TaskContext,
        symbols: &[String],
        interval: Interval,
        range: Range,
    ) -> Result<SummaryResult> {
        let body = json!({ "symbols": symbols, "interval": interval, "range": range });
        self.post_json(ctx, self.endpoint(&["analysis", "universe"]), &body).await
    }
}

#[async_trait]
impl NewsService for HttpBackend {
    async fn recent(&self, ctx: &TaskContext, symbol: &str, days: u32) -> Result<Vec<NewsItem>> {
        let mut url = self.endpoint(&["news", symbol]);
        url.query_pairs_mut().append_pair("days", &days.to_string());
        self.get_json(ctx, url).await
    }
}

#[async_trait]
impl JobStore for HttpBackend {
    async fn list_jobs(&self) -> Result<Vec<JobInfo>> {
        self.get_job_json(self.endpoint(&["jobs"])).await
    }

    async fn trigger(&self, name: &str) -> Result<JobRun> {
        let ctx = self.job_ctx();
        let url = self.endpoint(&["jobs", name, "run"]);
        let request = self.client.post(url.clone()).send();
        let response = ctx
            .run(request)
            .await
            .map_err(|c| self.job_cancelled(c))?
            .map_err(request_failed)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(NotFoundError::Job { name: name.into() }.into());
        }
        Self::decode(&url, response).await
    }

    async fn history(&self, limit: usize) -> Result<Vec<JobRun>> {
        let mut url = self.endpoint(&["jobs", "history"]);
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string());
        self.get_job_json(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(base_url: &str, timeout: Duration) -> HttpBackend {
        HttpBackend::new(base_url, reqwest::Client::new(), timeout).unwrap()
    }

    #[test]
    fn endpoints_join_the_base_path() {
        let b = backend("http://localhost:8000/", Duration::from_secs(1));
        assert_eq!(b.endpoint(&["jobs"]).as_str(), "http://localhost:8000/jobs");

        let b = backend("http://backend.internal/api/", Duration::from_secs(1));
        assert_eq!(
            b.endpoint(&["analysis", "symbol"]).as_str(),
            "http://backend.internal/api/analysis/symbol"
        );
    }

    #[test]
    fn caller_text_stays_inside_one_path_segment() {
        let b = backend("http://localhost:8000", Duration::from_secs(1));
        assert_eq!(
            b.endpoint(&["jobs", "a/b?c=1#x", "run"]).as_str(),
            "http://localhost:8000/jobs/a%2Fb%3Fc=1%23x/run"
        );
        assert_eq!(
            b.endpoint(&["jobs", "../admin", "run"]).path(),
            "/jobs/..%2Fadmin/run"
        );
    }

    #[test]
    fn invalid_base_url_is_a_config_error() {
        for bad in ["not a url", "mailto:ops@example.com"] {
            let err = HttpBackend::new(bad, reqwest::Client::new(), Duration::from_secs(1))
                .err()
                .unwrap();
            assert!(matches!(err, ConfigError::InvalidValue { .. }), "{bad}");
        }
    }

    #[test]
    fn job_deadline_is_a_collaborator_timeout() {
        let b = backend("http://localhost:8000", Duration::from_secs(3));
        assert!(b.job_cancelled(Cancelled::Shutdown).is_shutdown());
        let err = b.job_cancelled(Cancelled::Deadline);
        assert!(matches!(
            err,
            Error::Collaborator(CollaboratorError::Timeout { timeout, .. }) if timeout == Duration::from_secs(3)
        ));
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_request_failure() {
        let b = backend("http://127.0.0.1:9", Duration::from_secs(2));
        let err = b.list_jobs().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Collaborator(CollaboratorError::RequestFailed { .. })
                | Error::Collaborator(CollaboratorError::Timeout { .. })
        ));
    }
}
