//! In-memory ledger for tests and the `--simulated` CLI mode.
//!
//! State at any index is derived by replaying the scripted events, so point
//! reads behave like an archive node. Failures can be injected per call.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use alloy_primitives::{Address, B256, U256};
use common::ledger::{EventKind, EventPayload, IndexedRecord, LedgerEvent};
use parking_lot::Mutex;

use crate::error::SourceError;
use crate::source::{LedgerSource, PointQuery, PointValue};

pub const GENESIS_TIMESTAMP: u64 = 1_700_000_000;
pub const BLOCK_TIME_SECS: u64 = 12;
pub const INITIAL_SYMBOL: &str = "SHARE";

#[derive(Debug, Default)]
struct FailurePlan {
    event_queries: VecDeque<SourceError>,
    balances: HashMap<Address, SourceError>,
    total_supply: Option<SourceError>,
    records: Option<SourceError>,
    record_at: HashMap<u64, VecDeque<SourceError>>,
}

#[derive(Debug, Clone)]
struct TokenState {
    balances: HashMap<Address, U256>,
    supply: U256,
    symbol: String,
    multiplier: U256,
}

/// Scripted, deterministic [`LedgerSource`].
#[derive(Debug)]
pub struct SimulatedLedger {
    timestamps: Vec<u64>,
    deployed_at: u64,
    events: Vec<LedgerEvent>,
    next_tx: u64,
    visible_tip: AtomicU64,
    failures: Mutex<FailurePlan>,
    event_queries: AtomicUsize,
    point_reads: AtomicUsize,
    record_reads: AtomicUsize,
    existence_checks: AtomicUsize,
}

impl SimulatedLedger {
    /// Ledger with indices `0..=tip`, one every 12 seconds, deployed at 0.
    pub fn new(tip: u64) -> Self {
        Self {
            timestamps: (0..=tip)
                .map(|i| GENESIS_TIMESTAMP + i * BLOCK_TIME_SECS)
                .collect(),
            deployed_at: 0,
            events: Vec::new(),
            next_tx: 1,
            visible_tip: AtomicU64::new(u64::MAX),
            failures: Mutex::new(FailurePlan::default()),
            event_queries: AtomicUsize::new(0),
            point_reads: AtomicUsize::new(0),
            record_reads: AtomicUsize::new(0),
            existence_checks: AtomicUsize::new(0),
        }
    }

    /// Replace the timestamp of every index. `timestamps[i]` belongs to
    /// index `i`; the sequence must be non-decreasing.
    pub fn with_timestamps(mut self, timestamps: Vec<u64>) -> Self {
        debug_assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
        self.timestamps = timestamps;
        self
    }

    /// Hide every index after `index` until [`advance_tip`](Self::advance_tip)
    /// reveals more, as if they had not been mined yet.
    pub fn hold_tip_at(self, index: u64) -> Self {
        self.visible_tip.store(index, Ordering::SeqCst);
        self
    }

    /// Reveal scripted indices up to `index`.
    pub fn advance_tip(&self, index: u64) {
        self.visible_tip.store(index, Ordering::SeqCst);
    }

    pub fn deployed_at(mut self, index: u64) -> Self {
        self.deployed_at = index;
        self
    }

    pub fn mint(self, index: u64, to: Address, amount: u64) -> Self {
        self.transfer(index, Address::ZERO, to, amount)
    }

    pub fn burn(self, index: u64, from: Address, amount: u64) -> Self {
        self.transfer(index, from, Address::ZERO, amount)
    }

    pub fn transfer(self, index: u64, from: Address, to: Address, amount: u64) -> Self {
        self.event(
            index,
            EventPayload::Transfer {
                from,
                to,
                amount: U256::from(amount),
            },
        )
    }

    pub fn split(self, index: u64, new_multiplier: u64) -> Self {
        self.event(
            index,
            EventPayload::Split {
                new_multiplier: U256::from(new_multiplier),
            },
        )
    }

    pub fn symbol_change(self, index: u64, old_symbol: &str, new_symbol: &str) -> Self {
        self.event(
            index,
            EventPayload::SymbolChange {
                old_symbol: old_symbol.to_string(),
                new_symbol: new_symbol.to_string(),
            },
        )
    }

    pub fn allowlist(self, index: u64, account: Address, approved: bool) -> Self {
        self.event(index, EventPayload::AllowlistUpdate { account, approved })
    }

    /// Append an event as its own transaction.
    pub fn event(mut self, index: u64, payload: EventPayload) -> Self {
        let transaction_id = B256::left_padding_from(&self.next_tx.to_be_bytes());
        self.next_tx += 1;
        self.push(transaction_id, index, payload);
        self
    }

    /// Append several events sharing one transaction.
    pub fn batch(mut self, index: u64, payloads: Vec<EventPayload>) -> Self {
        let transaction_id = B256::left_padding_from(&self.next_tx.to_be_bytes());
        self.next_tx += 1;
        for payload in payloads {
            self.push(transaction_id, index, payload);
        }
        self
    }

    fn push(&mut self, transaction_id: B256, index: u64, payload: EventPayload) {
        debug_assert!(index >= self.deployed_at && index <= self.last_scripted_index());
        let position = self.events.iter().filter(|e| e.index == index).count() as u64;
        self.events.push(LedgerEvent {
            transaction_id,
            index,
            position,
            payload,
        });
    }

    /// Demo token used by the CLI's simulated mode.
    pub fn demo() -> Self {
        let founder = Address::repeat_byte(0xa1);
        let investor = Address::repeat_byte(0xb2);
        let employee = Address::repeat_byte(0xc3);
        let fund = Address::repeat_byte(0xd4);

        Self::new(200)
            .deployed_at(100)
            .allowlist(100, founder, true)
            .mint(101, founder, 1_000)
            .allowlist(103, investor, true)
            .transfer(105, founder, investor, 400)
            .split(110, 7)
            .allowlist(120, employee, true)
            .transfer(121, founder, employee, 700)
            .symbol_change(130, INITIAL_SYMBOL, "SHR")
            .allowlist(140, fund, true)
            .mint(141, fund, 3_000)
            .transfer(150, investor, fund, 800)
            .burn(160, employee, 200)
            .transfer(175, fund, founder, 500)
    }

    fn last_scripted_index(&self) -> u64 {
        self.timestamps.len().saturating_sub(1) as u64
    }

    pub fn tip_index(&self) -> u64 {
        self.last_scripted_index()
            .min(self.visible_tip.load(Ordering::SeqCst))
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    pub fn timestamp_of(&self, index: u64) -> Option<u64> {
        self.timestamps.get(index as usize).copied()
    }

    /// The next `count` event queries fail with `error`.
    pub fn fail_next_event_queries(&self, count: usize, error: SourceError) {
        let mut plan = self.failures.lock();
        for _ in 0..count {
            plan.event_queries.push_back(error.clone());
        }
    }

    /// Every balance read for `address` fails with `error`.
    pub fn fail_balance_of(&self, address: Address, error: SourceError) {
        self.failures.lock().balances.insert(address, error);
    }

    pub fn fail_total_supply(&self, error: SourceError) {
        self.failures.lock().total_supply = Some(error);
    }

    pub fn fail_records(&self, error: Option<SourceError>) {
        self.failures.lock().records = error;
    }

    /// The next `count` record reads of `index` fail with `error`.
    pub fn fail_record_at(&self, index: u64, count: usize, error: SourceError) {
        let mut plan = self.failures.lock();
        let queue = plan.record_at.entry(index).or_default();
        for _ in 0..count {
            queue.push_back(error.clone());
        }
    }

    pub fn event_query_count(&self) -> usize {
        self.event_queries.load(Ordering::SeqCst)
    }

    pub fn point_read_count(&self) -> usize {
        self.point_reads.load(Ordering::SeqCst)
    }

    pub fn record_read_count(&self) -> usize {
        self.record_reads.load(Ordering::SeqCst)
    }

    pub fn existence_check_count(&self) -> usize {
        self.existence_checks.load(Ordering::SeqCst)
    }

    fn check_index(&self, index: u64) -> Result<(), SourceError> {
        if index > self.tip_index() {
            Err(SourceError::MissingRecord { index })
        } else {
            Ok(())
        }
    }

    fn state_at(&self, index: u64) -> TokenState {
        let mut ordered: Vec<&LedgerEvent> =
            self.events.iter().filter(|e| e.index <= index).collect();
        ordered.sort_by_key(|e| e.ordering_key());

        let mut state = TokenState {
            balances: HashMap::new(),
            supply: U256::ZERO,
            symbol: INITIAL_SYMBOL.to_string(),
            multiplier: U256::from(1u64),
        };

        for event in ordered {
            match &event.payload {
                EventPayload::Transfer { from, to, amount } => {
                    if from.is_zero() {
                        state.supply += *amount;
                    } else {
                        let balance = state.balances.entry(*from).or_default();
                        *balance = balance.saturating_sub(*amount);
                    }
                    if to.is_zero() {
                        state.supply = state.supply.saturating_sub(*amount);
                    } else {
                        *state.balances.entry(*to).or_default() += *amount;
                    }
                }
                EventPayload::Split { new_multiplier } => {
                    let old = state.multiplier;
                    if !old.is_zero() {
                        for balance in state.balances.values_mut() {
                            *balance = *balance * *new_multiplier / old;
                        }
                        state.supply = state.supply * *new_multiplier / old;
                    }
                    state.multiplier = *new_multiplier;
                }
                EventPayload::SymbolChange { new_symbol, .. } => {
                    state.symbol = new_symbol.clone();
                }
                EventPayload::AllowlistUpdate { .. } => {}
            }
        }
        state
    }
}

#[async_trait::async_trait]
impl LedgerSource for SimulatedLedger {
    async fn tip(&self) -> Result<IndexedRecord, SourceError> {
        let index = self.tip_index();
        self.record_at(index).await
    }

    async fn record_at(&self, index: u64) -> Result<IndexedRecord, SourceError> {
        self.record_reads.fetch_add(1, Ordering::SeqCst);
        {
            let mut plan = self.failures.lock();
            if let Some(err) = plan.records.clone() {
                return Err(err);
            }
            if let Some(err) = plan.record_at.get_mut(&index).and_then(VecDeque::pop_front) {
                return Err(err);
            }
        }
        self.check_index(index)?;
        let timestamp = self
            .timestamp_of(index)
            .ok_or(SourceError::MissingRecord { index })?;
        Ok(IndexedRecord { index, timestamp })
    }

    async fn entity_exists(&self, index: u64) -> Result<bool, SourceError> {
        self.existence_checks.fetch_add(1, Ordering::SeqCst);
        self.check_index(index)?;
        Ok(index >= self.deployed_at)
    }

    async fn point_state(&self, query: PointQuery, index: u64) -> Result<PointValue, SourceError> {
        self.point_reads.fetch_add(1, Ordering::SeqCst);
        self.check_index(index)?;

        {
            let plan = self.failures.lock();
            match query {
                PointQuery::BalanceOf(address) => {
                    if let Some(err) = plan.balances.get(&address) {
                        return Err(err.clone());
                    }
                }
                PointQuery::TotalSupply => {
                    if let Some(err) = &plan.total_supply {
                        return Err(err.clone());
                    }
                }
                _ => {}
            }
        }

        if index < self.deployed_at {
            return Err(SourceError::Reverted(format!(
                "no contract code at index {}",
                index
            )));
        }

        let state = self.state_at(index);
        Ok(match query {
            PointQuery::BalanceOf(address) => {
                PointValue::Amount(state.balances.get(&address).copied().unwrap_or_default())
            }
            PointQuery::TotalSupply => PointValue::Amount(state.supply),
            PointQuery::Symbol => PointValue::Text(state.symbol),
            PointQuery::Multiplier => PointValue::Amount(state.multiplier),
        })
    }

    async fn query_events(
        &self,
        kinds: &[EventKind],
        from_index: u64,
        to_index: u64,
    ) -> Result<Vec<LedgerEvent>, SourceError> {
        self.event_queries.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().event_queries.pop_front() {
            return Err(err);
        }

        let to_index = to_index.min(self.tip_index());
        // Newest first on purpose: consumers must not rely on source order.
        Ok(self
            .events
            .iter()
            .rev()
            .filter(|e| e.index >= from_index && e.index <= to_index)
            .filter(|e| kinds.contains(&e.kind()))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Address {
        Address::repeat_byte(0xa1)
    }

    fn bob() -> Address {
        Address::repeat_byte(0xb2)
    }

    fn scenario() -> SimulatedLedger {
        SimulatedLedger::new(120)
            .deployed_at(100)
            .mint(101, alice(), 1_000)
            .transfer(105, alice(), bob(), 400)
            .split(110, 7)
    }

    async fn balance(ledger: &SimulatedLedger, who: Address, index: u64) -> U256 {
        ledger
            .point_state(PointQuery::BalanceOf(who), index)
            .await
            .unwrap()
            .into_amount()
            .unwrap()
    }

    #[tokio::test]
    async fn test_state_replays_split() {
        let ledger = scenario();
        assert_eq!(balance(&ledger, alice(), 105).await, U256::from(600u64));
        assert_eq!(balance(&ledger, alice(), 110).await, U256::from(4_200u64));
        assert_eq!(balance(&ledger, bob(), 110).await, U256::from(2_800u64));

        let supply = ledger
            .point_state(PointQuery::TotalSupply, 110)
            .await
            .unwrap();
        assert_eq!(supply, PointValue::Amount(U256::from(7_000u64)));
    }

    #[tokio::test]
    async fn test_existence_and_missing_records() {
        let ledger = scenario();
        assert!(!ledger.entity_exists(99).await.unwrap());
        assert!(ledger.entity_exists(100).await.unwrap());
        assert_eq!(
            ledger.record_at(121).await,
            Err(SourceError::MissingRecord { index: 121 })
        );
        assert!(matches!(
            ledger.point_state(PointQuery::TotalSupply, 50).await,
            Err(SourceError::Reverted(_))
        ));
    }

    #[tokio::test]
    async fn test_positions_are_per_index() {
        let ledger = SimulatedLedger::new(10)
            .mint(3, alice(), 5)
            .mint(3, bob(), 5)
            .mint(4, alice(), 1);
        let positions: Vec<(u64, u64)> = ledger.events().iter().map(|e| e.ordering_key()).collect();
        assert_eq!(positions, vec![(3, 0), (3, 1), (4, 0)]);
    }

    #[tokio::test]
    async fn test_injected_event_failures_are_consumed() {
        let ledger = scenario();
        ledger.fail_next_event_queries(1, SourceError::Transport("boom".into()));
        assert!(ledger.query_events(&[EventKind::Transfer], 0, 120).await.is_err());
        let events = ledger.query_events(&[EventKind::Transfer], 0, 120).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(ledger.event_query_count(), 2);
    }

    #[tokio::test]
    async fn test_held_tip_hides_later_indices() {
        let ledger = scenario().hold_tip_at(105);
        assert_eq!(ledger.tip().await.unwrap().index, 105);
        assert_eq!(
            ledger.record_at(106).await,
            Err(SourceError::MissingRecord { index: 106 })
        );
        let events = ledger.query_events(&EventKind::ALL, 0, 120).await.unwrap();
        assert!(events.iter().all(|e| e.index <= 105));

        ledger.advance_tip(110);
        assert_eq!(ledger.tip().await.unwrap().index, 110);
        let events = ledger.query_events(&[EventKind::Split], 0, 120).await.unwrap();
        assert_eq!(events.len(), 1);
    }
}
