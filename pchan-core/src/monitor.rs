use bitcoin::Txid;
use serde_derive::{Deserialize, Serialize};
use tracing::*;

use crate::prelude::*;

/// Something the chain told us about a channel
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonitorEvent {
    /// The funding transaction confirmed
    FundingConfirmed {
        /// Confirmations
        depth: u32,
    },
    /// A counterparty commitment confirmed
    CounterpartyCommitmentConfirmed {
        /// Its channel state
        sequence_number: u64,
        /// Its transaction id
        txid: Txid,
        /// Confirmations
        depth: u32,
    },
    /// A transaction closing the channel is buried deep enough
    ClosingConfirmed {
        /// The closing transaction
        txid: Txid,
        /// Confirmations
        depth: u32,
    },
}

/// State
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct State {
    // The funding transaction
    funding_txid: Option<Txid>,
    // Confirmations of the funding transaction
    funding_depth: Option<u32>,
    // Our closing transaction: the mutual close, or our commitment
    closing_txid: Option<Txid>,
    // The transaction that actually closed the channel on-chain
    closed_by: Option<Txid>,
    // Confirmations of `closed_by`
    closing_depth: Option<u32>,
    // Every counterparty commitment we countersigned, by txid
    counterparty_commitments: OrderedMap<Txid, u64>,
}

/// Tracks the transactions a channel cares about and turns confirmation
/// notifications into [MonitorEvent]s.
#[derive(Clone, Debug)]
pub struct ChannelMonitor {
    state: State,
    close_confirmation_depth: u32,
}

impl ChannelMonitor {
    /// A monitor that reports a close once it has `close_confirmation_depth`
    /// confirmations
    pub fn new(close_confirmation_depth: u32) -> Self {
        ChannelMonitor { state: State::default(), close_confirmation_depth }
    }

    /// Watch the funding transaction
    pub fn watch_funding(&mut self, txid: Txid) {
        self.state.funding_txid = Some(txid);
    }

    /// Watch our closing transaction
    pub fn watch_closing(&mut self, txid: Txid) {
        self.state.closing_txid = Some(txid);
    }

    /// Watch a counterparty commitment
    pub fn watch_counterparty_commitment(&mut self, txid: Txid, sequence_number: u64) {
        self.state.counterparty_commitments.insert(txid, sequence_number);
    }

    /// The sequence number of a watched counterparty commitment
    pub fn counterparty_commitment_sequence(&self, txid: &Txid) -> Option<u64> {
        self.state.counterparty_commitments.get(txid).cloned()
    }

    /// Confirmations of the funding transaction
    pub fn funding_depth(&self) -> Option<u32> {
        self.state.funding_depth
    }

    /// Confirmations of the closing transaction
    pub fn closing_depth(&self) -> Option<u32> {
        self.state.closing_depth
    }

    /// The transaction that closed the channel, once one confirmed
    pub fn closed_by(&self) -> Option<Txid> {
        self.state.closed_by
    }

    /// Whether a close has enough confirmations
    pub fn is_done(&self) -> bool {
        self.state.closing_depth.map_or(false, |d| d >= self.close_confirmation_depth)
    }

    /// Record that `txid` has `depth` confirmations.
    ///
    /// Unwatched transactions produce no events.
    pub fn transaction_confirmed(&mut self, txid: &Txid, depth: u32) -> Vec<MonitorEvent> {
        let mut events = Vec::new();
        if self.state.funding_txid.as_ref() == Some(txid) {
            self.state.funding_depth = Some(depth);
            events.push(MonitorEvent::FundingConfirmed { depth });
            return events;
        }

        let counterparty_sequence = self.counterparty_commitment_sequence(txid);
        let is_ours = self.state.closing_txid.as_ref() == Some(txid);
        if !is_ours && counterparty_sequence.is_none() {
            trace!("ignoring unwatched {}", txid);
            return events;
        }

        if let Some(closed_by) = self.state.closed_by {
            if closed_by != *txid {
                warn!("{} confirmed but channel was already closed by {}", txid, closed_by);
                return events;
            }
        }
        self.state.closed_by = Some(*txid);
        self.state.closing_depth = Some(depth);

        if let Some(sequence_number) = counterparty_sequence {
            events.push(MonitorEvent::CounterpartyCommitmentConfirmed {
                sequence_number,
                txid: *txid,
                depth,
            });
        }
        if depth >= self.close_confirmation_depth {
            events.push(MonitorEvent::ClosingConfirmed { txid: *txid, depth });
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;

    fn txid(i: u8) -> Txid {
        Txid::from_byte_array([i; 32])
    }

    #[test]
    fn funding_and_close_test() {
        let mut monitor = ChannelMonitor::new(6);
        monitor.watch_funding(txid(1));
        monitor.watch_closing(txid(2));
        assert!(monitor.transaction_confirmed(&txid(9), 10).is_empty());
        assert_eq!(
            monitor.transaction_confirmed(&txid(1), 3),
            vec![MonitorEvent::FundingConfirmed { depth: 3 }]
        );
        assert_eq!(monitor.funding_depth(), Some(3));
        assert!(monitor.transaction_confirmed(&txid(2), 5).is_empty());
        assert!(!monitor.is_done());
        assert_eq!(
            monitor.transaction_confirmed(&txid(2), 6),
            vec![MonitorEvent::ClosingConfirmed { txid: txid(2), depth: 6 }]
        );
        assert!(monitor.is_done());
        assert_eq!(monitor.closed_by(), Some(txid(2)));
    }

    #[test]
    fn counterparty_commitment_test() {
        let mut monitor = ChannelMonitor::new(1);
        monitor.watch_counterparty_commitment(txid(3), 4);
        monitor.watch_closing(txid(2));
        assert_eq!(
            monitor.transaction_confirmed(&txid(3), 1),
            vec![
                MonitorEvent::CounterpartyCommitmentConfirmed {
                    sequence_number: 4,
                    txid: txid(3),
                    depth: 1
                },
                MonitorEvent::ClosingConfirmed { txid: txid(3), depth: 1 },
            ]
        );
        // a conflicting close can't also confirm
        assert!(monitor.transaction_confirmed(&txid(2), 1).is_empty());
    }
}
