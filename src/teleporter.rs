//! Teleporter registry app operations
//!
//! Every Teleporter registry app (token remotes included) lets its manager
//! pause individual Teleporter messenger addresses and raise the minimum
//! accepted Teleporter version. Messages delivered through a paused address
//! are rejected until it is unpaused.

use std::collections::HashSet;

use ethereum_types::{Address, U256};
use tokio::sync::Mutex;
use tracing::info;

use crate::abi::{encode_call, Decoder, Token};
use crate::error::Result;
use crate::events::{parser, ContractEvent, EventWatcher};
use crate::evm_client::TransactionRequest;

pub struct TeleporterApp {
    watcher: EventWatcher,
    address: Address,
    /// Last known pause state per Teleporter address
    paused: Mutex<HashSet<Address>>,
}

impl TeleporterApp {
    pub fn new(watcher: EventWatcher, address: Address) -> Self {
        Self {
            watcher,
            address,
            paused: Mutex::new(HashSet::new()),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Pause `teleporter_address` and wait for `TeleporterAddressPaused`.
    pub async fn pause_teleporter_address(&self, teleporter_address: Address) -> Result<()> {
        let data = encode_call(
            "pauseTeleporterAddress(address)",
            &[Token::Address(teleporter_address)],
        );
        let tx_hash = self
            .watcher
            .client()
            .send_transaction(TransactionRequest::call(self.address, data))
            .await?;
        self.watcher
            .wait_for(
                tx_hash,
                "TeleporterAddressPaused",
                parser(|event| match event {
                    ContractEvent::TeleporterAddressPaused { teleporter_address: a }
                        if a == teleporter_address =>
                    {
                        Some(())
                    }
                    _ => None,
                }),
            )
            .await?;

        self.paused.lock().await.insert(teleporter_address);
        info!("Paused Teleporter address {:?} on {:?}", teleporter_address, self.address);
        Ok(())
    }

    /// Unpause `teleporter_address` and wait for `TeleporterAddressUnpaused`.
    pub async fn unpause_teleporter_address(&self, teleporter_address: Address) -> Result<()> {
        let data = encode_call(
            "unpauseTeleporterAddress(address)",
            &[Token::Address(teleporter_address)],
        );
        let tx_hash = self
            .watcher
            .client()
            .send_transaction(TransactionRequest::call(self.address, data))
            .await?;
        self.watcher
            .wait_for(
                tx_hash,
                "TeleporterAddressUnpaused",
                parser(|event| match event {
                    ContractEvent::TeleporterAddressUnpaused { teleporter_address: a }
                        if a == teleporter_address =>
                    {
                        Some(())
                    }
                    _ => None,
                }),
            )
            .await?;

        self.paused.lock().await.remove(&teleporter_address);
        info!("Unpaused Teleporter address {:?} on {:?}", teleporter_address, self.address);
        Ok(())
    }

    /// Read the pause state from the chain and refresh the cache.
    pub async fn is_teleporter_address_paused(&self, teleporter_address: Address) -> Result<bool> {
        let data = encode_call(
            "isTeleporterAddressPaused(address)",
            &[Token::Address(teleporter_address)],
        );
        let result = self.watcher.client().call(self.address, data).await?;
        let paused = Decoder::new(&result).bool(0)?;

        let mut cache = self.paused.lock().await;
        if paused {
            cache.insert(teleporter_address);
        } else {
            cache.remove(&teleporter_address);
        }
        Ok(paused)
    }

    /// Cached pause state; no chain access.
    pub async fn cached_paused(&self, teleporter_address: &Address) -> bool {
        self.paused.lock().await.contains(teleporter_address)
    }

    /// Fold an observed pause/unpause event into the cache.
    pub async fn apply_event(&self, event: &ContractEvent) -> bool {
        let mut cache = self.paused.lock().await;
        match event {
            ContractEvent::TeleporterAddressPaused { teleporter_address } => {
                cache.insert(*teleporter_address)
            }
            ContractEvent::TeleporterAddressUnpaused { teleporter_address } => {
                cache.remove(teleporter_address)
            }
            _ => false,
        }
    }

    /// Returns `(old_version, new_version)` from `MinTeleporterVersionUpdated`.
    pub async fn update_min_teleporter_version(&self, version: u64) -> Result<(U256, U256)> {
        let data = encode_call(
            "updateMinTeleporterVersion(uint256)",
            &[Token::uint(version)],
        );
        let tx_hash = self
            .watcher
            .client()
            .send_transaction(TransactionRequest::call(self.address, data))
            .await?;
        let versions = self
            .watcher
            .wait_for(
                tx_hash,
                "MinTeleporterVersionUpdated",
                parser(|event| match event {
                    ContractEvent::MinTeleporterVersionUpdated {
                        old_version,
                        new_version,
                    } => Some((old_version, new_version)),
                    _ => None,
                }),
            )
            .await?;
        info!(
            "Min Teleporter version on {:?} updated {} -> {}",
            self.address, versions.0, versions.1
        );
        Ok(versions)
    }

    pub async fn get_min_teleporter_version(&self) -> Result<u64> {
        let result = self
            .watcher
            .client()
            .call(self.address, encode_call("getMinTeleporterVersion()", &[]))
            .await?;
        Decoder::new(&result).u64(0)
    }
}
