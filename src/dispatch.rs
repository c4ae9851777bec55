//! Outbound calls from the judge to execution hosts

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::error::DispatchError;
use crate::pool::Host;
use crate::protocol::{ExecuteRequest, ExecuteResponse};

/// Sends one execution request to one host
#[async_trait]
pub trait ExecutionClient: Send + Sync {
    async fn execute(
        &self,
        host: &Host,
        req: &ExecuteRequest,
    ) -> Result<ExecuteResponse, DispatchError>;
}

/// `POST http://<address>:<port>/compile_and_run`
#[derive(Debug, Clone)]
pub struct HttpExecutionClient {
    client: reqwest::Client,
}

impl HttpExecutionClient {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub fn endpoint(host: &Host) -> String {
        format!("http://{}:{}/compile_and_run", host.address(), host.port())
    }
}

#[async_trait]
impl ExecutionClient for HttpExecutionClient {
    async fn execute(
        &self,
        host: &Host,
        req: &ExecuteRequest,
    ) -> Result<ExecuteResponse, DispatchError> {
        let url = Self::endpoint(host);
        debug!("Dispatching to {}", url);

        let resp = self
            .client
            .post(&url)
            .json(req)
            .send()
            .await
            .map_err(|source| DispatchError::Transport {
                host: host.to_string(),
                source,
            })?;

        if !resp.status().is_success() {
            return Err(DispatchError::Status {
                host: host.to_string(),
                status: resp.status().as_u16(),
            });
        }

        resp.json::<ExecuteResponse>()
            .await
            .map_err(|source| DispatchError::Decode {
                host: host.to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::HostPool;

    #[test]
    fn test_endpoint_url() {
        let pool = HostPool::parse("10.1.2.3:8081\n").unwrap();
        let host = pool.choose().unwrap();
        assert_eq!(
            HttpExecutionClient::endpoint(&host),
            "http://10.1.2.3:8081/compile_and_run"
        );
    }
}
