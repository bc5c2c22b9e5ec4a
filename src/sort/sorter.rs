//! Collaborators that receive decoded data.
//!
//! The sort daemon owns exactly one [`Sorter`] and one [`ScalerSink`] and calls them
//! from its own thread only, so neither is ever reentered or called concurrently.

use serde::Serialize;

/// Receives every completed event.
pub trait Sorter: Send {
    /// Process one event. The slice is reused for the next event after return.
    fn sort(&mut self, event: &[i32]) -> anyhow::Result<()>;
}

/// Receives raw scaler blocks, outside the event path.
pub trait ScalerSink: Send {
    /// Record one block of scaler values.
    fn record(&mut self, values: &[i32]);
}

impl<F> Sorter for F
where
    F: FnMut(&[i32]) -> anyhow::Result<()> + Send,
{
    fn sort(&mut self, event: &[i32]) -> anyhow::Result<()> {
        self(event)
    }
}

/// Per-parameter hit counts: how often each parameter was non-zero.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParameterTally {
    events: u64,
    hits: Vec<u64>,
}

impl ParameterTally {
    /// Tally for events of `event_size` parameters.
    pub fn new(event_size: usize) -> Self {
        Self {
            events: 0,
            hits: vec![0; event_size],
        }
    }

    /// Number of events seen.
    pub fn events(&self) -> u64 {
        self.events
    }

    /// Hit count per parameter.
    pub fn hits(&self) -> &[u64] {
        &self.hits
    }

    /// Parameters that were hit at least once, with their counts.
    pub fn active(&self) -> impl Iterator<Item = (usize, u64)> + '_ {
        self.hits
            .iter()
            .enumerate()
            .filter(|(_, &count)| count > 0)
            .map(|(index, &count)| (index, count))
    }
}

impl Sorter for ParameterTally {
    fn sort(&mut self, event: &[i32]) -> anyhow::Result<()> {
        if event.len() > self.hits.len() {
            self.hits.resize(event.len(), 0);
        }
        for (count, &value) in self.hits.iter_mut().zip(event) {
            if value != 0 {
                *count += 1;
            }
        }
        self.events += 1;
        Ok(())
    }
}

/// Running totals of every scaler channel, plus the latest block.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScalerTotals {
    blocks: u64,
    latest: Vec<i32>,
    totals: Vec<i64>,
}

impl ScalerTotals {
    /// Empty totals.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blocks recorded.
    pub fn blocks(&self) -> u64 {
        self.blocks
    }

    /// Values of the most recent block.
    pub fn latest(&self) -> &[i32] {
        &self.latest
    }

    /// Sum of every block, per channel.
    pub fn totals(&self) -> &[i64] {
        &self.totals
    }
}

impl ScalerSink for ScalerTotals {
    fn record(&mut self, values: &[i32]) {
        if values.len() > self.totals.len() {
            self.totals.resize(values.len(), 0);
        }
        for (total, &value) in self.totals.iter_mut().zip(values) {
            *total += i64::from(value);
        }
        self.latest.clear();
        self.latest.extend_from_slice(values);
        self.blocks += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally_counts_non_zero_parameters() {
        let mut tally = ParameterTally::new(4);
        tally.sort(&[1, 0, 3, 0]).unwrap();
        tally.sort(&[0, 0, 7, 0]).unwrap();

        assert_eq!(tally.events(), 2);
        assert_eq!(tally.hits(), &[1, 0, 2, 0]);
        assert_eq!(tally.active().collect::<Vec<_>>(), vec![(0, 1), (2, 2)]);
    }

    #[test]
    fn test_scaler_totals_accumulate() {
        let mut scalers = ScalerTotals::new();
        scalers.record(&[10, 20]);
        scalers.record(&[1, 2, 3]);

        assert_eq!(scalers.blocks(), 2);
        assert_eq!(scalers.latest(), &[1, 2, 3]);
        assert_eq!(scalers.totals(), &[11, 22, 3]);
    }

    #[test]
    fn test_closure_is_a_sorter() {
        let mut seen = Vec::new();
        {
            let mut sorter = |event: &[i32]| -> anyhow::Result<()> {
                seen.push(event[0]);
                Ok(())
            };
            sorter.sort(&[5]).unwrap();
            sorter.sort(&[6]).unwrap();
        }
        assert_eq!(seen, vec![5, 6]);
    }
}
