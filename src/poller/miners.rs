//! Miner / pool identification from coinbase payout addresses

use std::collections::BTreeMap;

pub const UNKNOWN_MINER: &str = "unknown";

#[derive(Debug, Clone, Default)]
pub struct MinerDirectory {
    /// payout address -> pool name
    pools: BTreeMap<String, String>,
}

impl MinerDirectory {
    pub fn new(pools: BTreeMap<String, String>) -> Self {
        Self { pools }
    }

    /// Known pools resolve to their name, anything else to the bare address
    pub fn identify(&self, payout_address: Option<&str>) -> String {
        match payout_address {
            Some(addr) => self
                .pools
                .get(addr)
                .cloned()
                .unwrap_or_else(|| addr.to_string()),
            None => UNKNOWN_MINER.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}
