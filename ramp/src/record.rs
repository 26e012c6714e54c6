//! Canonical shape of LOG and TXN entries.
//!
//! LOG FORMAT                        TXN FORMAT
//! {                                 {
//!     kid: key id                       kid: key id
//!     pxn: prepare id                   tsv: timestamp
//!     tsv: timestamp                    pxn: prepare id from LOG
//!     cid: client id                    tmb: tombstone timestamp
//!     uid: user id                      cid: client id
//!     rid: request id                   uid: user id
//!     ver: record schema version        rid: request id
//!     met: write-set                    org: origin timestamp
//!     dat: payload                      ver: record schema version
//!     idx: promoted index values        met: write-set
//! }                                     dat: payload
//!                                       idx: promoted index values
//!                                   }
//!
//! A LOG entry is immutable once prepared; commit promotes it into TXN
//! verbatim apart from the tombstone and origin fields. Field names are part
//! of the external contract.

use std::collections::BTreeMap;
use std::fmt;

use serde_derive::{Deserialize, Serialize};

use crate::meta::WriteMeta;
use crate::prepare::{Pxn, Tsv};
use crate::value::Value;

/// The only defined wire schema. Records carrying any other version are
/// skipped on read.
pub const SCHEMA_VERSION: u32 = 1;

/// A prepared write, keyed by `(kid, pxn)`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub kid: String,
    pub pxn: Pxn,
    pub tsv: Tsv,
    pub cid: String,
    pub uid: String,
    pub rid: String,
    pub ver: u32,
    pub met: Vec<WriteMeta>,
    pub dat: Value,
    pub idx: BTreeMap<String, Value>,
}

/// A committed version, keyed by `(kid, tsv)`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TxnRecord {
    pub kid: String,
    pub tsv: Tsv,
    pub pxn: Pxn,
    pub tmb: Tsv,
    pub cid: String,
    pub uid: String,
    pub rid: String,
    pub org: Tsv,
    pub ver: u32,
    pub met: Vec<WriteMeta>,
    pub dat: Value,
    pub idx: BTreeMap<String, Value>,
}

impl TxnRecord {
    /// Promotes a LOG entry into its committed form. An empty payload sets
    /// the tombstone to the record's own timestamp.
    pub fn from_log(log: &LogRecord, org: Tsv) -> TxnRecord {
        let tmb = if log.dat.is_null() { log.tsv } else { Tsv::ZERO };
        TxnRecord {
            kid: log.kid.clone(),
            tsv: log.tsv,
            pxn: log.pxn,
            tmb,
            cid: log.cid.clone(),
            uid: log.uid.clone(),
            rid: log.rid.clone(),
            org,
            ver: log.ver,
            met: log.met.clone(),
            dat: log.dat.clone(),
            idx: log.idx.clone(),
        }
    }

    /// Rebuilds the LOG value this record was committed from, for refresh
    /// when the original entry has been pruned.
    pub fn to_log(&self) -> LogRecord {
        LogRecord {
            kid: self.kid.clone(),
            pxn: self.pxn,
            tsv: self.tsv,
            cid: self.cid.clone(),
            uid: self.uid.clone(),
            rid: self.rid.clone(),
            ver: self.ver,
            met: self.met.clone(),
            dat: self.dat.clone(),
            idx: self.idx.clone(),
        }
    }

    /// A record is deleted when a tombstone exists strictly in the past:
    /// it is still live at its own commit instant.
    pub fn is_deleted(&self, tsv: Tsv) -> bool {
        !self.tmb.is_zero() && self.tmb < tsv
    }

    /// Record fields as a value tree for span attributes; the payload is
    /// excluded so stored data never reaches tracing.
    pub fn meta_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("kid".to_string(), Value::from(self.kid.as_str()));
        map.insert("tsv".to_string(), Value::from(self.tsv.to_string()));
        map.insert("pxn".to_string(), Value::from(self.pxn.to_string()));
        map.insert("tmb".to_string(), Value::from(self.tmb.to_string()));
        map.insert("cid".to_string(), Value::from(self.cid.as_str()));
        map.insert("uid".to_string(), Value::from(self.uid.as_str()));
        map.insert("rid".to_string(), Value::from(self.rid.as_str()));
        map.insert("org".to_string(), Value::from(self.org.to_string()));
        map.insert("ver".to_string(), Value::Int(self.ver as i64));
        map.insert("met".to_string(), met_value(&self.met));
        Value::Map(map)
    }
}

impl LogRecord {
    /// See [`TxnRecord::meta_value`].
    pub fn meta_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("kid".to_string(), Value::from(self.kid.as_str()));
        map.insert("pxn".to_string(), Value::from(self.pxn.to_string()));
        map.insert("tsv".to_string(), Value::from(self.tsv.to_string()));
        map.insert("cid".to_string(), Value::from(self.cid.as_str()));
        map.insert("uid".to_string(), Value::from(self.uid.as_str()));
        map.insert("rid".to_string(), Value::from(self.rid.as_str()));
        map.insert("ver".to_string(), Value::Int(self.ver as i64));
        map.insert("met".to_string(), met_value(&self.met));
        Value::Map(map)
    }
}

fn met_value(met: &[WriteMeta]) -> Value {
    Value::List(
        met.iter()
            .map(|m| {
                let mut entry = BTreeMap::new();
                entry.insert("kid".to_string(), Value::from(m.kid.as_str()));
                entry.insert("loc".to_string(), Value::from(m.loc.as_str()));
                entry.insert("pxn".to_string(), Value::from(m.pxn.to_string()));
                Value::Map(entry)
            })
            .collect(),
    )
}

impl fmt::Display for TxnRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kid={} tsv={} pxn={}", self.kid, self.tsv, self.pxn)
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kid={} tsv={} pxn={}", self.kid, self.tsv, self.pxn)
    }
}

/// LOG key listing entry returned by scans.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogKey {
    pub kid: String,
    pub pxn: Pxn,
}

/// TXN key listing entry returned by scans.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnKey {
    pub kid: String,
    pub tsv: Tsv,
}

/// Partial TXN projection returned by secondary-index probes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdxProjection {
    pub kid: String,
    pub tsv: Tsv,
    pub pxn: Pxn,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn log_fixture(dat: Value) -> LogRecord {
        LogRecord {
            kid: "k".to_string(),
            pxn: Pxn::new(10, 1),
            tsv: Tsv::from_micros(5_000_000),
            cid: "1".to_string(),
            uid: "0".to_string(),
            rid: "0".to_string(),
            ver: SCHEMA_VERSION,
            met: vec![WriteMeta::new("other", "memory|r|n", Pxn::new(10, 1))],
            dat,
            idx: BTreeMap::new(),
        }
    }

    #[test]
    fn from_log_copies_fields() {
        let log = log_fixture(Value::Int(7));
        let txn = TxnRecord::from_log(&log, Tsv::from_micros(1));
        assert_eq!(txn.kid, log.kid);
        assert_eq!(txn.tsv, log.tsv);
        assert_eq!(txn.pxn, log.pxn);
        assert_eq!(txn.org, Tsv::from_micros(1));
        assert_eq!(txn.tmb, Tsv::ZERO);
        assert_eq!(txn.met, log.met);
        assert_eq!(txn.dat, log.dat);
        assert_eq!(txn.to_log(), log);
    }

    #[test]
    fn empty_payload_sets_tombstone() {
        let log = log_fixture(Value::Null);
        let txn = TxnRecord::from_log(&log, Tsv::ZERO);
        assert_eq!(txn.tmb, log.tsv);
        assert!(txn.dat.is_null());
    }

    #[test]
    fn deleted_strictly_after_commit_instant() {
        let log = log_fixture(Value::Null);
        let txn = TxnRecord::from_log(&log, Tsv::ZERO);
        // live at its own commit instant, deleted one microsecond later
        assert!(!txn.is_deleted(txn.tmb));
        assert!(txn.is_deleted(txn.tmb.add_micros(1)));

        let live = TxnRecord::from_log(&log_fixture(Value::Int(1)), Tsv::ZERO);
        assert!(!live.is_deleted(Tsv::MAX));
    }

    #[test]
    fn meta_value_excludes_payload() {
        let txn = TxnRecord::from_log(&log_fixture(Value::from("secret")), Tsv::ZERO);
        let Value::Map(map) = txn.meta_value() else { panic!("expected map") };
        assert!(!map.contains_key("dat"));
        assert_eq!(map["kid"], Value::from("k"));
        assert_eq!(map["tsv"], Value::from("5.000000"));
    }

    #[test]
    fn wire_round_trip() {
        let txn = TxnRecord::from_log(&log_fixture(Value::Int(7)), Tsv::ZERO);
        let bytes = bincode::serialize(&txn).expect("encode");
        assert_eq!(bincode::deserialize::<TxnRecord>(&bytes).expect("decode"), txn);
    }
}
