//! Sampling strategies pushed by operators, served to clients per service.

use api_structs::sampling::{SamplingStrategy, StrategyUpdate};
use backtraced_error::{error_chain_to_pretty_formatted, SerdeJsonError};
use std::collections::HashMap;
use tokio::sync::mpsc::Receiver;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument};

pub type Shared<T> = std::sync::Arc<parking_lot::RwLock<T>>;

#[derive(Debug, Default)]
struct Strategies {
    per_service: HashMap<String, SamplingStrategy>,
    default: SamplingStrategy,
}

/// `(key, payload)`, a `None` key targets the default strategy
pub type StrategyMessage = (Option<String>, Vec<u8>);

#[derive(Debug, Clone, Default)]
pub struct SamplingStrategyStore {
    strategies: Shared<Strategies>,
}

impl SamplingStrategyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes a `{"type": ..., "param": ...}` message and stores the strategy
    /// for `key`, or as the default when there is no key
    pub fn apply(
        &self,
        key: Option<&str>,
        payload: &[u8],
    ) -> Result<SamplingStrategy, SerdeJsonError> {
        let update: StrategyUpdate = serde_json::from_slice(payload).map_err(|e| {
            SerdeJsonError::from_serde_json_error(
                e,
                format!("decoding sampling strategy update for {key:?}"),
                String::from_utf8_lossy(payload).to_string(),
            )
        })?;
        let strategy = SamplingStrategy::from(update);
        let mut strategies = self.strategies.write();
        match key {
            None => strategies.default = strategy,
            Some(service) => {
                strategies.per_service.insert(service.to_string(), strategy);
            }
        }
        Ok(strategy)
    }

    pub fn apply_logging_error(&self, key: Option<&str>, payload: &[u8]) {
        match self.apply(key, payload) {
            Ok(strategy) => info!("Sampling strategy for {:?} is now {:?}", key, strategy),
            Err(e) => error!("{}", error_chain_to_pretty_formatted(&e)),
        }
    }

    pub fn get_sampling_strategy(&self, service: &str) -> SamplingStrategy {
        let strategies = self.strategies.read();
        strategies
            .per_service
            .get(service)
            .copied()
            .unwrap_or(strategies.default)
    }

    /// Drains `receiver` until every sender is gone
    pub fn spawn_updater(&self, mut receiver: Receiver<StrategyMessage>) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            while let Some((key, payload)) = receiver.recv().await {
                store.handle_message(key.as_deref(), &payload);
            }
            info!("Sampling strategy channel closed");
        })
    }

    #[instrument(skip_all, fields(key = ?key))]
    fn handle_message(&self, key: Option<&str>, payload: &[u8]) {
        self.apply_logging_error(key, payload);
    }
}
