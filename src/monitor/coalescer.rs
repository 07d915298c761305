use ethers::types::{Address, Log};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// What `observe` did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Reorged-out event; cache untouched.
    Ignored,
    Cached,
    /// First event of another block. `window` holds everything cached for
    /// `previous` and must be processed before the next drain; the event
    /// itself opened the new window unless it was a removed one.
    NewBlock { previous: u64, window: Vec<Log> },
}

/// Latest event per pool address within one settlement window.
///
/// Owned by the driver loop; nothing else mutates it.
#[derive(Debug, Default)]
pub struct Coalescer {
    cache: HashMap<Address, Log>,
    block_number: u64,
}

impl Coalescer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, log: Log) -> Observation {
        let block = log.block_number.map_or(0, |b| b.as_u64());
        let previous = self.block_number;
        self.block_number = block;
        let window = (previous != 0 && block != previous).then(|| self.take_sorted());

        if !log.removed.unwrap_or(false) {
            self.cache.insert(log.address, log);
        } else if window.is_none() {
            return Observation::Ignored;
        }
        match window {
            Some(window) => Observation::NewBlock { previous, window },
            None => Observation::Cached,
        }
    }

    /// Block of the most recently observed event, 0 when idle.
    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Take every cached event, ordered by chain position, and reset.
    pub fn drain(&mut self) -> Vec<Log> {
        self.block_number = 0;
        self.take_sorted()
    }

    fn take_sorted(&mut self) -> Vec<Log> {
        let mut logs: Vec<Log> = self.cache.drain().map(|(_, log)| log).collect();
        logs.sort_by_key(|l| (l.block_number, l.log_index));
        logs
    }
}

/// Trailing-edge quiet-period timer: every `arm` pushes the deadline out.
#[derive(Debug)]
pub struct Debounce {
    quiet: Duration,
    deadline: Option<Instant>,
}

impl Debounce {
    pub fn new(quiet: Duration) -> Self {
        Self { quiet, deadline: None }
    }

    pub fn arm(&mut self) {
        self.deadline = Some(Instant::now() + self.quiet);
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolve at the deadline; never resolves while disarmed.
    pub async fn fired(&self) {
        match self.deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{Bytes, H256, U64, U256};

    fn log(address: u8, block: u64, index: u64, removed: bool) -> Log {
        Log {
            address: Address::repeat_byte(address),
            topics: vec![H256::repeat_byte(0x1c)],
            data: Bytes::from(vec![index as u8]),
            block_number: Some(U64::from(block)),
            log_index: Some(U256::from(index)),
            removed: Some(removed),
            ..Default::default()
        }
    }

    #[test]
    fn burst_for_one_address_collapses_to_latest() {
        let mut c = Coalescer::new();
        for i in 0..3 {
            c.observe(log(0xaa, 100, i, false));
        }
        assert_eq!(c.len(), 1);
        let drained = c.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].log_index, Some(U256::from(2)));
        assert!(c.is_empty());
        assert_eq!(c.block_number(), 0);
    }

    #[test]
    fn removed_event_leaves_prior_entry() {
        let mut c = Coalescer::new();
        c.observe(log(0xaa, 100, 1, false));
        assert_eq!(c.observe(log(0xaa, 100, 5, true)), Observation::Ignored);
        let drained = c.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].log_index, Some(U256::from(1)));
    }

    #[test]
    fn removed_event_alone_is_not_cached() {
        let mut c = Coalescer::new();
        assert_eq!(c.observe(log(0xaa, 100, 1, true)), Observation::Ignored);
        assert!(c.is_empty());
        assert_eq!(c.block_number(), 100);
    }

    fn addresses(logs: &[Log]) -> Vec<Address> {
        logs.iter().map(|l| l.address).collect()
    }

    #[test]
    fn two_blocks_make_two_windows() {
        let mut c = Coalescer::new();
        assert_eq!(c.observe(log(0xaa, 100, 1, false)), Observation::Cached);
        assert_eq!(c.observe(log(0xbb, 100, 2, false)), Observation::Cached);

        let Observation::NewBlock { previous, window } = c.observe(log(0xcc, 101, 0, false)) else {
            panic!("expected a block boundary");
        };
        assert_eq!(previous, 100);
        assert_eq!(addresses(&window), vec![Address::repeat_byte(0xaa), Address::repeat_byte(0xbb)]);
        assert!(window.iter().all(|l| l.block_number == Some(U64::from(100))));
        assert_eq!(c.block_number(), 101);

        let second = c.drain();
        assert_eq!(addresses(&second), vec![Address::repeat_byte(0xcc)]);
    }

    #[test]
    fn removed_event_from_next_block_still_closes_the_window() {
        let mut c = Coalescer::new();
        c.observe(log(0xaa, 100, 1, false));
        let Observation::NewBlock { previous, window } = c.observe(log(0xbb, 101, 0, true)) else {
            panic!("expected a block boundary");
        };
        assert_eq!(previous, 100);
        assert_eq!(addresses(&window), vec![Address::repeat_byte(0xaa)]);
        assert!(c.is_empty());
        assert_eq!(c.block_number(), 101);
    }

    #[tokio::test]
    async fn rearming_extends_the_window() {
        let mut d = Debounce::new(Duration::from_millis(40));
        assert!(d.deadline().is_none());
        let started = Instant::now();
        d.arm();
        let first = d.deadline().unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
        d.arm();
        assert!(d.deadline().unwrap() > first);

        d.fired().await;
        assert!(started.elapsed() >= Duration::from_millis(65));
        d.disarm();
        assert!(d.deadline().is_none());
    }
}
