//! Running lifecycle statistics: admission/confirmation counts and how long
//! transactions waited in the mempool before being mined.

const MAX_LEAD_TIME_SAMPLES: usize = 10_000;

#[derive(Debug, Clone, Default)]
pub struct TrackerStats {
    pub total_admitted: u64,
    pub total_confirmed: u64,
    pub total_removed: u64,
    pub total_readmitted: u64,
    pub total_lead_time_secs: u64,
    /// Most recent lead times, bounded
    lead_time_samples: Vec<u64>,
}

impl TrackerStats {
    pub fn record_confirmation(&mut self, lead_time_secs: u64) {
        self.total_confirmed += 1;
        self.total_lead_time_secs += lead_time_secs;
        if self.lead_time_samples.len() == MAX_LEAD_TIME_SAMPLES {
            self.lead_time_samples.remove(0);
        }
        self.lead_time_samples.push(lead_time_secs);
    }

    /// Confirmed share of everything that left the mempool, as a percentage
    pub fn confirmation_rate(&self) -> f64 {
        let left = self.total_confirmed + self.total_removed;
        if left == 0 {
            return 0.0;
        }
        self.total_confirmed as f64 / left as f64 * 100.0
    }

    pub fn median_lead_time_secs(&self) -> u64 {
        if self.lead_time_samples.is_empty() {
            return 0;
        }
        let mut sorted = self.lead_time_samples.clone();
        sorted.sort_unstable();
        sorted[sorted.len() / 2]
    }

    pub fn mean_lead_time_secs(&self) -> u64 {
        if self.total_confirmed == 0 {
            return 0;
        }
        self.total_lead_time_secs / self.total_confirmed
    }
}
