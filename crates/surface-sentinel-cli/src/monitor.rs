//! HTTP sink forwarding emergency reports to a monitoring service.

use async_trait::async_trait;

use surface_sentinel::{RecoveryReport, ReportSink, SentinelError, SentinelResult};

/// Posts each report as JSON to `{endpoint}/emergency-report`.
pub struct HttpReportSink {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpReportSink {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self) -> String {
        format!("{}/emergency-report", self.endpoint)
    }
}

#[async_trait]
impl ReportSink for HttpReportSink {
    async fn send(&self, report: &RecoveryReport) -> SentinelResult<()> {
        let resp = self
            .client
            .post(self.url())
            .json(report)
            .send()
            .await
            .map_err(|e| SentinelError::Host(format!("monitoring endpoint unreachable: {e}")))?;
        if !resp.status().is_success() {
            return Err(SentinelError::Host(format!(
                "monitoring endpoint rejected report: {}",
                resp.status()
            )));
        }
        tracing::debug!("Sent {} report to {}", report.failure_type, self.endpoint);
        Ok(())
    }
}
