// Copyright (c) 2026 parknet contributors
// SPDX-License-Identifier: AGPL-3.0

//! HTTP transport: POSTs every envelope to `<peer>/messages` on each agent,
//! this node's own gateway included.

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

use crate::infrastructure::message_bus::{BusError, Payload, Transport};

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoints: Vec<String>,
}

impl HttpTransport {
    /// `peers` and `local` are base URLs such as `http://10.0.0.12:8021`.
    pub fn new(local: &str, peers: &[String], timeout: Duration) -> Result<Self, BusError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BusError::Transport(format!("Failed to create HTTP client: {e}")))?;

        let endpoints = std::iter::once(local)
            .chain(peers.iter().map(String::as_str))
            .map(|base| format!("{}/messages", base.trim_end_matches('/')))
            .collect();

        Ok(Self { client, endpoints })
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    async fn post(&self, endpoint: &str, payload: &Payload) -> Result<(), String> {
        let response = self
            .client
            .post(endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(payload.to_vec())
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("{} answered {}", endpoint, response.status()));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn broadcast(&self, payload: Payload) -> Result<(), BusError> {
        let sends = self.endpoints.iter().map(|endpoint| self.post(endpoint, &payload));
        let failures: Vec<String> = join_all(sends)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();

        if failures.is_empty() {
            debug!(endpoints = self.endpoints.len(), "Broadcast delivered");
            return Ok(());
        }

        for failure in &failures {
            warn!(error = %failure, "Peer unreachable");
        }
        Err(BusError::Transport(format!(
            "{} of {} endpoints unreachable",
            failures.len(),
            self.endpoints.len()
        )))
    }
}
