//! Event monitor
//!
//! Polls the validator manager and (if configured) the token remote for new
//! logs, folds the decoded events into local state, and periodically
//! re-reads contract state so anything missed is reconciled.

use std::sync::Arc;
use std::time::Duration;

use ethereum_types::Address;
use tracing::{debug, error, info, warn};

use crate::config::OperatorConfig;
use crate::error::Result;
use crate::events::{ContractEvent, EventWatcher, LogCursor};
use crate::lifecycle::ValidatorLifecycle;
use crate::token_bridge::TokenBridgeClient;

// ============================================================================
// EVENT MONITOR STRUCTURE
// ============================================================================

pub struct EventMonitor {
    watcher: EventWatcher,
    lifecycle: Arc<ValidatorLifecycle>,
    bridge: Option<Arc<TokenBridgeClient>>,
    polling_interval: Duration,
    /// Resync every this many polls (0 disables)
    resync_interval_polls: u64,
    manager_cursor: LogCursor,
    bridge_cursor: Option<LogCursor>,
    polls: u64,
}

impl EventMonitor {
    /// Monitor starting at `from_block` on every watched contract.
    pub fn new(
        watcher: EventWatcher,
        lifecycle: Arc<ValidatorLifecycle>,
        bridge: Option<Arc<TokenBridgeClient>>,
        operator: &OperatorConfig,
        from_block: u64,
    ) -> Self {
        let manager_cursor = watcher.subscribe_all(lifecycle.manager_address(), from_block);
        let bridge_cursor = bridge
            .as_ref()
            .map(|b| watcher.subscribe_all(b.address(), from_block));
        Self {
            watcher,
            lifecycle,
            bridge,
            polling_interval: Duration::from_millis(operator.polling_interval_ms),
            resync_interval_polls: operator.resync_interval_polls,
            manager_cursor,
            bridge_cursor,
            polls: 0,
        }
    }

    /// Next unread block of the validator manager cursor.
    pub fn position(&self) -> u64 {
        self.manager_cursor.position()
    }

    /// Run until the process stops. Poll errors are logged, never fatal.
    pub async fn run(mut self) -> anyhow::Result<()> {
        info!(
            "Starting event monitoring (every {:?}, resync every {} polls)",
            self.polling_interval, self.resync_interval_polls
        );
        loop {
            match self.poll_once().await {
                Ok(applied) if applied > 0 => debug!("Applied {} events", applied),
                Ok(_) => {}
                Err(e) => error!("Event poll failed: {}", e),
            }
            tokio::time::sleep(self.polling_interval).await;
        }
    }

    /// One polling round. Returns how many events changed local state.
    pub async fn poll_once(&mut self) -> Result<usize> {
        self.polls += 1;
        let mut applied = 0;

        let manager_address = self.lifecycle.manager_address();
        for event in drain(&self.watcher, &mut self.manager_cursor, manager_address).await? {
            if self.lifecycle.apply_event(&event).await {
                applied += 1;
            }
        }

        if let (Some(bridge), Some(cursor)) = (self.bridge.clone(), self.bridge_cursor.as_mut()) {
            for event in drain(&self.watcher, cursor, bridge.address()).await? {
                if apply_bridge_event(&bridge, &event).await {
                    applied += 1;
                }
            }
        }

        if self.resync_interval_polls > 0 && self.polls % self.resync_interval_polls == 0 {
            self.resync().await?;
        }
        Ok(applied)
    }

    /// Re-read contract state for every tracked record and the collateral flag.
    pub async fn resync(&self) -> Result<()> {
        let advanced = self.lifecycle.resync().await?;
        if let Some(bridge) = &self.bridge {
            let collateralized = bridge.refresh_collateral().await?;
            debug!("Token remote {:?} collateralized: {}", bridge.address(), collateralized);
        }
        debug!("Resync complete ({} records advanced)", advanced);
        Ok(())
    }
}

/// Read every available event from `cursor`. A failed cursor is replaced
/// by a fresh one at the same position before the error is returned.
async fn drain(
    watcher: &EventWatcher,
    cursor: &mut LogCursor,
    address: Address,
) -> Result<Vec<ContractEvent>> {
    let mut events = Vec::new();
    loop {
        match cursor.next_event().await {
            Ok(Some(event)) => events.push(event),
            Ok(None) => return Ok(events),
            Err(e) => {
                if cursor.is_failed() {
                    warn!(
                        "Restarting log cursor for {:?} at block {}",
                        address,
                        cursor.position()
                    );
                    *cursor = watcher.subscribe_all(address, cursor.position());
                }
                if events.is_empty() {
                    return Err(e);
                }
                // Keep what was read; the next poll resumes from the cursor
                warn!("Partial poll of {:?}: {}", address, e);
                return Ok(events);
            }
        }
    }
}

async fn apply_bridge_event(bridge: &TokenBridgeClient, event: &ContractEvent) -> bool {
    match event {
        ContractEvent::TeleporterAddressPaused { .. }
        | ContractEvent::TeleporterAddressUnpaused { .. } => bridge.app().apply_event(event).await,
        ContractEvent::CallFailed {
            recipient_contract,
            amount,
        } => {
            warn!(
                "Call to {:?} failed on token remote {:?} ({})",
                recipient_contract,
                bridge.address(),
                amount
            );
            false
        }
        other => {
            debug!("Observed {} on token remote {:?}", other.name(), bridge.address());
            false
        }
    }
}
