// src/position_service.rs

use crate::errors::{PositionError, SdkError};
use crate::metrics;
use crate::network::Network;
use crate::position_fetcher::{AppGroupsDefinition, PositionFetcher};
use crate::settings::PipelineSettings;
use crate::types::conversions::address_to_string;
use crate::types::position::{AppTokenPosition, ContractPosition, PositionRecord};
use dashmap::DashMap;
use ethers::types::Address;
use log::{info, warn};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

/// Outcome of one group fetch: the positions that passed validation and a note for every
/// instance that was left out.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionsReport<P> {
    pub network: Network,
    pub app_id: String,
    pub group_id: String,
    pub positions: Vec<P>,
    pub errors: Vec<PositionError>,
}

impl<P> PositionsReport<P> {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

type GroupKey = (Network, String, String);

/// Runs position fetchers and keeps the latest app tokens and contract positions per group.
///
/// Registered app tokens double as priced underlyings: the token service falls back to
/// them when a token has no base price.
pub struct PositionService {
    options: PipelineSettings,
    app_tokens: DashMap<GroupKey, Vec<AppTokenPosition<Value>>>,
    contract_positions: DashMap<GroupKey, Vec<ContractPosition<Value>>>,
}

impl PositionService {
    pub fn new(options: PipelineSettings) -> Self {
        Self {
            options,
            app_tokens: DashMap::new(),
            contract_positions: DashMap::new(),
        }
    }

    /// Fetches and validates one group. Never fails as a whole.
    ///
    /// A group-level [`SdkError::BatchExecution`] is retried with exponential backoff; any
    /// other group-level failure, or the last retry's, becomes the report's only error.
    pub async fn compute_positions<F: PositionFetcher>(&self, fetcher: &F) -> PositionsReport<F::Position> {
        let (network, app_id, group_id) = (fetcher.network(), fetcher.app_id(), fetcher.group_id());
        let mut report = PositionsReport {
            network,
            app_id: app_id.to_string(),
            group_id: group_id.to_string(),
            positions: Vec::new(),
            errors: Vec::new(),
        };

        let attempts = AtomicUsize::new(0);
        let outcome = RetryIf::spawn(
            self.retry_strategy(),
            || {
                if attempts.fetch_add(1, Ordering::Relaxed) > 0 {
                    metrics::increment_pipeline_retries(app_id);
                }
                fetcher.fetch()
            },
            |e: &SdkError| {
                let retry = e.is_retryable();
                if retry {
                    warn!("{}/{} on {}: {}; retrying", app_id, group_id, network, e);
                }
                retry
            },
        )
        .await;

        let outcomes = match outcome {
            Ok(outcomes) => outcomes,
            Err(e) => {
                warn!(
                    "{}/{} on {} failed after {} attempt(s): {}",
                    app_id,
                    group_id,
                    network,
                    attempts.load(Ordering::Relaxed),
                    e
                );
                report.errors.push(PositionError::new(group_id, e));
                metrics::increment_positions_omitted(app_id, group_id, 1);
                return report;
            }
        };

        for outcome in outcomes {
            match outcome.and_then(|position| match position.validate() {
                Ok(()) => Ok(position),
                Err(e) => Err(PositionError::new(position.address(), e)),
            }) {
                Ok(position) => report.positions.push(position),
                Err(note) => {
                    warn!(
                        "{}/{} on {}: omitting {}: {}",
                        app_id, group_id, network, note.instance, note.message
                    );
                    report.errors.push(note);
                }
            }
        }

        metrics::increment_positions_computed(app_id, group_id, report.positions.len() as u64);
        metrics::increment_positions_omitted(app_id, group_id, report.errors.len() as u64);
        info!(
            "{}/{} on {}: {} position(s), {} omitted",
            app_id,
            group_id,
            network,
            report.positions.len(),
            report.errors.len()
        );
        report
    }

    /// [`Self::compute_positions`] for app tokens, registering the result for price lookups.
    pub async fn compute_app_token_positions<F, T>(&self, fetcher: &F) -> PositionsReport<AppTokenPosition<T>>
    where
        F: PositionFetcher<Position = AppTokenPosition<T>>,
        T: Serialize + Clone + Send + 'static,
    {
        let mut report = self.compute_positions(fetcher).await;
        let mut erased = Vec::with_capacity(report.positions.len());
        for position in &report.positions {
            match position.clone().erase() {
                Ok(position) => erased.push(position),
                Err(e) => report.errors.push(PositionError::new(position.address.clone(), e)),
            }
        }
        // A failed group keeps the previously registered tokens.
        if !report.positions.is_empty() || report.errors.is_empty() {
            self.app_tokens.insert(key(&report), erased);
        }
        report
    }

    /// [`Self::compute_positions`] for contract positions, registering the result.
    pub async fn compute_contract_positions<F, T>(&self, fetcher: &F) -> PositionsReport<ContractPosition<T>>
    where
        F: PositionFetcher<Position = ContractPosition<T>>,
        T: Serialize + Clone + Send + 'static,
    {
        let mut report = self.compute_positions(fetcher).await;
        let mut erased = Vec::with_capacity(report.positions.len());
        for position in &report.positions {
            match position.clone().erase() {
                Ok(position) => erased.push(position),
                Err(e) => report.errors.push(PositionError::new(position.address.clone(), e)),
            }
        }
        if !report.positions.is_empty() || report.errors.is_empty() {
            self.contract_positions.insert(key(&report), erased);
        }
        report
    }

    pub fn get_app_token_positions(&self, definitions: &[AppGroupsDefinition]) -> Vec<AppTokenPosition<Value>> {
        select(&self.app_tokens, definitions)
    }

    pub fn get_app_contract_positions(&self, definitions: &[AppGroupsDefinition]) -> Vec<ContractPosition<Value>> {
        select(&self.contract_positions, definitions)
    }

    /// Registered app token at `address` on `network`, if any group produced one.
    pub fn find_app_token(&self, network: Network, address: Address) -> Option<AppTokenPosition<Value>> {
        let address = address_to_string(address);
        self.app_tokens
            .iter()
            .filter(|entry| entry.key().0 == network)
            .find_map(|entry| entry.value().iter().find(|p| p.address == address).cloned())
    }

    fn retry_strategy(&self) -> impl Iterator<Item = Duration> {
        // from_millis(2) doubles per attempt; the factor scales the first delay to the base.
        let factor = (self.options.retry_base_delay_ms / 2).max(1);
        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(Duration::from_millis(self.options.retry_max_delay_ms))
            .map(jitter)
            .take(self.options.max_retries)
    }
}

fn key<P>(report: &PositionsReport<P>) -> GroupKey {
    (report.network, report.app_id.clone(), report.group_id.clone())
}

fn select<P: Clone>(registry: &DashMap<GroupKey, Vec<P>>, definitions: &[AppGroupsDefinition]) -> Vec<P> {
    let mut selected = Vec::new();
    for definition in definitions {
        let mut matching: Vec<_> = registry
            .iter()
            .filter(|entry| {
                let (network, app_id, group_id) = entry.key();
                definition.matches(*network, app_id, group_id)
            })
            .map(|entry| (entry.key().2.clone(), entry.value().clone()))
            .collect();
        // DashMap iteration order is arbitrary; keep results stable by group id.
        matching.sort_by(|a, b| a.0.cmp(&b.0));
        selected.extend(matching.into_iter().flat_map(|(_, positions)| positions));
    }
    selected
}
