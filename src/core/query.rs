//! Read-only projections over the history store, the lifecycle evaluator and the wallet.
//!
//! Queries never mutate anything; the pending set is consulted only to annotate views.

use serde::Serialize;
use std::collections::BTreeMap;
use crate::core::history::{scan, scan_all, ClaimRecord, ScanQuery};
use crate::core::lifecycle::{expires_in, ClaimStatus};
use crate::core::name::Name;
use crate::core::script::{ClaimOp, Destination};
use crate::core::Registry;
use crate::error::{RegistryError, Result};

/// A claim record as shown to users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimView {
    pub name: String,
    pub value: String,
    pub txid: String,
    pub height: u64,
    /// Destination of the claim output, when the owning transaction is known.
    pub address: Option<String>,
    pub expires_in: i64,
    pub expired: bool,
    /// An operation on the name is in flight.
    pub pending: bool,
}

/// A claim held (or given away) by this wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnedClaimView {
    #[serde(flatten)]
    pub claim: ClaimView,
    /// The last operation paid the claim to a destination outside this wallet.
    pub transferred: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FilterQuery {
    /// Regular expression searched in names. Empty matches every name.
    pub pattern: String,
    /// Only names updated within this many blocks; `None` uses the configured default,
    /// zero is unbounded.
    pub max_age: Option<u64>,
    pub from: usize,
    pub count: Option<usize>,
    pub stats_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterEntry {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    pub expired: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FilterResult {
    Entries(Vec<FilterEntry>),
    Stats { blocks: u64, count: usize },
}

/// One record of `scan`. Expired records hide their value, as in `filter`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanEntry {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub txid: String,
    pub height: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    pub expired: bool,
}

impl Registry {
    /// Most recent record of `name`. `NotFound` if the name has no record.
    pub fn show(&self, name: &Name) -> Result<ClaimView> {
        let history = self.store.read_history(name)?;
        let record = history
            .last()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        let current = self.chain.current_height()?;
        self.view(record, current, self.pending.has_pending(name))
    }

    /// Every record of `name`, oldest first.
    pub fn history(&self, name: &Name) -> Result<Vec<ClaimView>> {
        let history = self.store.read_history(name)?;
        let current = self.chain.current_height()?;
        let pending = self.pending.has_pending(name);
        let last = history.len().saturating_sub(1);
        history
            .iter()
            .enumerate()
            .map(|(i, record)| self.view(record, current, pending && i == last))
            .collect()
    }

    /// Derived status of `name`.
    pub fn status(&self, name: &Name) -> Result<ClaimStatus> {
        let current = self.chain.current_height()?;
        self.status_at(name, current)
    }

    /// Claims this wallet created, latest indexed operation per name, sorted by name.
    pub fn list_mine(&self) -> Result<Vec<OwnedClaimView>> {
        let current = self.chain.current_height()?;
        let mut latest: BTreeMap<Name, (ClaimRecord, Destination)> = BTreeMap::new();

        for tx in self.wallet.my_transactions() {
            let Some(claim) = tx.claim_output() else {
                continue;
            };
            let name = match &claim.op {
                ClaimOp::Activate { name, .. } | ClaimOp::Update { name, .. } => name.clone(),
                ClaimOp::Reserve { .. } => continue,
            };
            let history = self.history_or_empty(&name)?;
            let Some(record) = history.into_iter().find(|r| r.txid == tx.txid) else {
                continue;
            };
            let newer = latest
                .get(&name)
                .map_or(true, |(current, _)| record.height >= current.height);
            if newer {
                latest.insert(name, (record, claim.destination));
            }
        }

        latest
            .into_iter()
            .map(|(name, (record, destination))| {
                let mut claim = self.view(&record, current, self.pending.has_pending(&name))?;
                claim.address = Some(destination.to_string());
                Ok(OwnedClaimView { claim, transferred: !self.wallet.is_mine(&destination) })
            })
            .collect()
    }

    /// Names whose most recent record matches `query`, in scan order.
    pub fn filter(&self, query: &FilterQuery) -> Result<FilterResult> {
        let current = self.chain.current_height()?;
        let max_age = query.max_age.unwrap_or(self.config.filter_max_age);
        let scan_query = ScanQuery {
            pattern: query.pattern.clone(),
            max_age,
            current_height: current,
            offset: query.from,
            limit: query.count,
        };
        let chain = &self.chain;
        let depth = |h| chain.expiration_depth(h);

        if query.stats_only {
            let mut count = 0;
            for entry in scan(self.store.as_ref(), &scan_query)? {
                entry?;
                count += 1;
            }
            return Ok(FilterResult::Stats { blocks: current, count });
        }

        let mut entries = Vec::new();
        for entry in scan(self.store.as_ref(), &scan_query)? {
            let (name, record) = entry?;
            let left = expires_in(&record, current, depth);
            let expired = left <= 0;
            entries.push(FilterEntry {
                name: name.to_string_lossy(),
                value: (!expired).then(|| String::from_utf8_lossy(&record.value).into_owned()),
                expires_in: (!expired).then_some(left),
                expired,
            });
        }
        Ok(FilterResult::Entries(entries))
    }

    /// Every record of names at or after `start`, up to `max_count` (configured default
    /// when `None`).
    pub fn scan(&self, start: Option<&Name>, max_count: Option<usize>) -> Result<Vec<ScanEntry>> {
        let current = self.chain.current_height()?;
        let max_count = max_count.unwrap_or(self.config.scan_max_count);
        let chain = &self.chain;
        Ok(scan_all(self.store.as_ref(), start, max_count)?
            .into_iter()
            .map(|record| {
                let left = expires_in(&record, current, |h| chain.expiration_depth(h));
                let expired = left <= 0;
                ScanEntry {
                    name: record.name.to_string_lossy(),
                    value: (!expired).then(|| String::from_utf8_lossy(&record.value).into_owned()),
                    txid: record.txid.to_hex(),
                    height: record.height,
                    expires_in: (!expired).then_some(left),
                    expired,
                }
            })
            .collect())
    }

    fn view(&self, record: &ClaimRecord, current: u64, pending: bool) -> Result<ClaimView> {
        let chain = &self.chain;
        let left = expires_in(record, current, |h| chain.expiration_depth(h));
        let address = self
            .chain
            .get_transaction(&record.txid)?
            .and_then(|(tx, _)| tx.claim_output())
            .map(|claim| claim.destination.to_string());
        Ok(ClaimView {
            name: record.name.to_string_lossy(),
            value: String::from_utf8_lossy(&record.value).into_owned(),
            txid: record.txid.to_hex(),
            height: record.height,
            address,
            expires_in: left,
            expired: left <= 0,
            pending,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::core::fee::{Amount, LinearFeeSchedule, COIN};
    use crate::core::history::MemoryHistoryStore;
    use crate::core::ledger::{MemoryLedger, MemoryWallet};
    use crate::core::machine::{ActivateRequest, UpdateRequest};
    use crate::core::script::KeyId;
    use std::sync::Arc;
    use crate::core::chain::ChainView;

    struct Fixture {
        ledger: Arc<MemoryLedger>,
        registry: Registry,
    }

    fn fixture() -> Fixture {
        let ledger = Arc::new(MemoryLedger::with_params(100, LinearFeeSchedule::default(), |_| 50));
        let wallet = Arc::new(MemoryWallet::generate(ledger.clone(), Amount::new(100 * COIN)).unwrap());
        let registry = Registry::new(RegistryConfig::default(), ledger.clone(), wallet, Arc::new(MemoryHistoryStore::new()));
        Fixture { ledger, registry }
    }

    impl Fixture {
        fn mine(&self) {
            self.registry.handle_event(self.ledger.mine_block()).unwrap();
        }

        fn claim(&self, name: &str, value: &str) {
            let name = Name::new(name).unwrap();
            self.registry.reserve(&name).unwrap();
            self.mine();
            self.registry.activate(ActivateRequest::new(name, value)).unwrap();
            self.mine();
        }
    }

    fn name(s: &str) -> Name {
        Name::new(s).unwrap()
    }

    #[test]
    fn test_show_and_history() {
        let f = fixture();
        assert!(matches!(f.registry.show(&name("bob")), Err(RegistryError::NotFound(_))));

        f.claim("bob", "hello");
        let view = f.registry.show(&name("bob")).unwrap();
        assert_eq!(view.name, "bob");
        assert_eq!(view.value, "hello");
        assert_eq!(view.expires_in, 50);
        assert!(!view.expired && !view.pending);
        assert!(view.address.unwrap().starts_with("key:"));

        f.registry.update(UpdateRequest::new(name("bob"), "world")).unwrap();
        let pending = f.registry.history(&name("bob")).unwrap();
        assert!(pending.last().unwrap().pending);
        f.mine();
        let values: Vec<String> = f.registry.history(&name("bob")).unwrap().into_iter().map(|v| v.value).collect();
        assert_eq!(values, vec!["hello", "world"]);
    }

    #[test]
    fn test_status_transitions() {
        let f = fixture();
        assert_eq!(f.registry.status(&name("bob")).unwrap(), ClaimStatus::Unclaimed);
        f.claim("bob", "hello");
        assert!(f.registry.status(&name("bob")).unwrap().is_active());
        f.ledger.advance(50);
        assert!(matches!(f.registry.status(&name("bob")).unwrap(), ClaimStatus::Expired(_)));
    }

    #[test]
    fn test_list_mine_marks_transfers() {
        let f = fixture();
        f.claim("alice", "a");
        f.claim("bob", "b");
        f.registry
            .update(UpdateRequest::new(name("bob"), "gone").transfer_to(Destination::KeyDestination(KeyId([4; 20]))))
            .unwrap();
        // unconfirmed updates are not listed yet
        let before = f.registry.list_mine().unwrap();
        assert_eq!(before.iter().map(|c| c.claim.value.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
        f.mine();

        let mine = f.registry.list_mine().unwrap();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].claim.name, "alice");
        assert!(!mine[0].transferred);
        assert_eq!(mine[1].claim.value, "gone");
        assert!(mine[1].transferred);
    }

    #[test]
    fn test_filter_entries_and_stats() {
        let f = fixture();
        f.claim("alpha", "1");
        f.claim("beta", "2");
        f.claim("alps", "3");

        let result = f.registry.filter(&FilterQuery { pattern: "^al".into(), ..FilterQuery::default() }).unwrap();
        let FilterResult::Entries(entries) = result else { panic!("expected entries") };
        assert_eq!(entries.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(), vec!["alpha", "alps"]);
        assert_eq!(entries[0].value.as_deref(), Some("1"));

        // stats report the chain height, not the age window
        let stats = f.registry.filter(&FilterQuery { stats_only: true, ..FilterQuery::default() }).unwrap();
        let height = f.ledger.current_height().unwrap();
        assert_eq!(height, 106);
        assert_eq!(stats, FilterResult::Stats { blocks: height, count: 3 });

        let page = f.registry.filter(&FilterQuery { from: 1, count: Some(1), ..FilterQuery::default() }).unwrap();
        let FilterResult::Entries(page) = page else { panic!("expected entries") };
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].name, "alps");

        assert!(matches!(
            f.registry.filter(&FilterQuery { pattern: "[".into(), ..FilterQuery::default() }),
            Err(RegistryError::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_filter_hides_expired_values() {
        let f = fixture();
        f.claim("bob", "hello");
        f.ledger.advance(60);
        let result = f.registry.filter(&FilterQuery { max_age: Some(0), ..FilterQuery::default() }).unwrap();
        let FilterResult::Entries(entries) = result else { panic!("expected entries") };
        assert_eq!(entries.len(), 1);
        assert!(entries[0].expired);
        assert!(entries[0].value.is_none());
        assert!(entries[0].expires_in.is_none());

        // the default max age still covers it, a short one does not
        let aged = f.registry.filter(&FilterQuery { max_age: Some(10), ..FilterQuery::default() }).unwrap();
        assert_eq!(aged, FilterResult::Entries(vec![]));
    }

    #[test]
    fn test_scan_all_records() {
        let f = fixture();
        f.claim("alice", "a1");
        f.claim("bob", "b1");
        f.registry.update(UpdateRequest::new(name("alice"), "a2")).unwrap();
        f.mine();

        let all = f.registry.scan(None, None).unwrap();
        assert_eq!(
            all.iter().map(|e| e.value.as_deref().unwrap()).collect::<Vec<_>>(),
            vec!["a1", "a2", "b1"]
        );
        let from_b = f.registry.scan(Some(&name("b")), Some(10)).unwrap();
        assert_eq!(from_b.len(), 1);
        assert_eq!(from_b[0].name, "bob");
    }

    #[test]
    fn test_scan_hides_expired_values() {
        let f = fixture();
        f.claim("alice", "old");
        // alice is claimed at 102 and expires at 152; bob is claimed at 154
        f.ledger.advance(50);
        f.claim("bob", "fresh");

        let all = f.registry.scan(None, None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "alice");
        assert!(all[0].expired);
        assert!(all[0].value.is_none());
        assert!(all[0].expires_in.is_none());
        assert_eq!(all[1].value.as_deref(), Some("fresh"));
        assert_eq!(all[1].expires_in, Some(50));

        let json = serde_json::to_value(&all[0]).unwrap();
        assert!(json.get("value").is_none());
    }
}
