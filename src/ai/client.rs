use reqwest::Client;
use serde_json::Value;
use thiserror::Error;

use crate::{config::ClassifierConfig, domain::Verdict};

use super::inference::{parse_verdict, ClassificationRequest};

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier did not answer within {0:?}")]
    Timeout(std::time::Duration),
    #[error("classifier transport failure: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("classifier returned HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("classifier body is not JSON: {0}")]
    InvalidBody(#[source] serde_json::Error),
}

#[derive(Clone)]
pub struct ClassifierClient {
    http: Client,
    config: ClassifierConfig,
}

impl ClassifierClient {
    pub fn new(http: Client, config: ClassifierConfig) -> Self {
        Self { http, config }
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    /// POSTs the request and normalizes the answer, abandoning it after the timeout.
    pub async fn classify(&self, request: &ClassificationRequest) -> Result<Verdict, ClassifierError> {
        let limit = self.config.timeout;
        match tokio::time::timeout(limit, self.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(ClassifierError::Timeout(limit)),
        }
    }

    async fn send(&self, request: &ClassificationRequest) -> Result<Verdict, ClassifierError> {
        let response = self
            .http
            .post(&self.config.endpoint)
            .timeout(self.config.timeout)
            .json(request)
            .send()
            .await
            .map_err(|err| self.transport(err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClassifierError::Status(status));
        }

        let body = response.bytes().await.map_err(|err| self.transport(err))?;
        let value: Value = serde_json::from_slice(&body).map_err(ClassifierError::InvalidBody)?;
        Ok(parse_verdict(&value))
    }

    fn transport(&self, err: reqwest::Error) -> ClassifierError {
        if err.is_timeout() {
            ClassifierError::Timeout(self.config.timeout)
        } else {
            ClassifierError::Transport(err)
        }
    }
}
