//! Periodic dispatch loops driving a [`PacketEngine`].

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::PacketEngine;

/// One action key and whether the supplies loop presses it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickValue {
    pub key: String,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClickerConfig {
    pub click_values: Vec<ClickValue>,
    /// One animation frame.
    pub supply_interval_ms: u64,
    pub mine_delay_ms: u64,
    pub mine_key: String,
}

impl Default for ClickerConfig {
    fn default() -> Self {
        Self {
            click_values: Vec::new(),
            supply_interval_ms: 16,
            mine_delay_ms: 100,
            mine_key: "5".to_string(),
        }
    }
}

impl ClickerConfig {
    pub fn enabled_keys(&self) -> impl Iterator<Item = &str> {
        self.click_values
            .iter()
            .filter(|value| value.enabled)
            .map(|value| value.key.as_str())
    }
}

pub struct Clicker {
    engine: Arc<PacketEngine>,
    config: ClickerConfig,
}

impl Clicker {
    pub fn new(engine: Arc<PacketEngine>, config: ClickerConfig) -> Self {
        Self { engine, config }
    }

    pub fn config(&self) -> &ClickerConfig {
        &self.config
    }

    /// Clicks every enabled key that is ready; returns how many dispatched.
    pub fn supplies_tick(&self) -> usize {
        self.config
            .enabled_keys()
            .filter(|key| self.engine.is_ready(key))
            .filter(|key| self.engine.click_supply(key).is_dispatched())
            .count()
    }

    /// Clicks the mine key once; returns 1 when it dispatched.
    pub fn mines_tick(&self) -> usize {
        usize::from(self.engine.click_supply(&self.config.mine_key).is_dispatched())
    }

    /// Runs [`Self::supplies_tick`] every `supply_interval_ms` until `token`
    /// is cancelled. Returns the total number of dispatches.
    pub async fn run_supplies(&self, token: CancellationToken) -> usize {
        let period = Duration::from_millis(self.config.supply_interval_ms.max(1));
        self.run("supplies", period, token, || self.supplies_tick()).await
    }

    /// Runs [`Self::mines_tick`] every `mine_delay_ms` until `token` is
    /// cancelled. Returns the total number of dispatches.
    pub async fn run_mines(&self, token: CancellationToken) -> usize {
        let period = Duration::from_millis(self.config.mine_delay_ms.max(1));
        self.run("mines", period, token, || self.mines_tick()).await
    }

    async fn run(
        &self,
        name: &'static str,
        period: Duration,
        token: CancellationToken,
        tick: impl Fn() -> usize,
    ) -> usize {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(target: "diaphantium_engine", loop_name = name, period = ?period, "clicker loop started");

        let mut total = 0;
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    let dispatched = tick();
                    if dispatched > 0 {
                        debug!(target: "diaphantium_engine", loop_name = name, dispatched, "clicker tick");
                    }
                    total += dispatched;
                }
            }
        }

        info!(target: "diaphantium_engine", loop_name = name, total, "clicker loop stopped");
        total
    }
}
