pub mod decoder;

use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::{Address, B256};
use alloy::providers::{Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::{Filter, Log};
use chrono::Utc;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::config::ChainConfig;
use crate::stream::producer::StreamProducer;
use crate::stream::StreamBus;

/// Subscribes to filtered bridging logs on the chain node and forwards each
/// decoded event to the stream producer.
///
/// A bad log or a failed publish is logged and skipped; only a
/// subscription-transport failure ends the loop, and the restart policy
/// belongs to the caller.
pub struct ChainEventWatcher<B: StreamBus> {
    ws_url: String,
    address: Address,
    topic: B256,
    producer: Arc<StreamProducer<B>>,
}

impl<B: StreamBus> ChainEventWatcher<B> {
    pub fn new(config: &ChainConfig, producer: Arc<StreamProducer<B>>) -> eyre::Result<Self> {
        let address = Address::from_str(&config.contract_address)
            .map_err(|e| eyre::eyre!("Invalid contract address '{}': {}", config.contract_address, e))?;

        let topic = match &config.topic0 {
            Some(hex) => B256::from_str(hex)
                .map_err(|e| eyre::eyre!("Invalid topic0 '{}': {}", hex, e))?,
            None => decoder::SOCKET_BRIDGE_TOPIC,
        };

        Ok(Self {
            ws_url: config.ws_url.clone(),
            address,
            topic,
            producer,
        })
    }

    /// Open one long-lived filtered-log subscription and block until it ends
    /// or `shutdown` is cancelled. A transport-level subscription failure
    /// propagates as the returned error.
    pub async fn subscribe(&self, shutdown: CancellationToken) -> eyre::Result<()> {
        let ws = WsConnect::new(&self.ws_url);
        let provider = ProviderBuilder::new()
            .connect_ws(ws)
            .await
            .map_err(|e| eyre::eyre!("Failed to connect to chain node: {}", e))?;

        let filter = Filter::new()
            .address(self.address)
            .event_signature(self.topic);

        let sub = provider
            .subscribe_logs(&filter)
            .await
            .map_err(|e| eyre::eyre!("Failed to subscribe to contract logs: {}", e))?;
        let mut stream = sub.into_stream();

        tracing::info!(
            address = %self.address,
            topic = %self.topic,
            "Log subscription active"
        );

        loop {
            tokio::select! {
                maybe_log = stream.next() => {
                    match maybe_log {
                        Some(log) => self.handle_log(&log).await,
                        None => {
                            return Err(eyre::eyre!("Log subscription ended unexpectedly"));
                        }
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("Shutdown received, closing log subscription");
                    return Ok(());
                }
            }
        }
    }

    /// Decode and forward one log. Failures here never end the subscription.
    async fn handle_log(&self, log: &Log) {
        let Some(raw) = decoder::decode_bridge_log(log, self.topic) else {
            tracing::warn!(
                tx = ?log.transaction_hash,
                "Failed to decode bridging log, skipping"
            );
            return;
        };

        let event = decoder::to_canonical(&raw, Utc::now());

        if let Err(e) = self.producer.publish(&event).await {
            tracing::error!(
                tx = %event.transaction_hash,
                error = %e,
                "Failed to publish event, skipping"
            );
        }
    }
}
