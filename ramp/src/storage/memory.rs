//! The in-memory reference backend.
//!
//! A `MemoryStore` is the process analogue of a backend endpoint: drivers
//! constructed with the same handle and partition name share tables, drivers
//! with different handles are fully isolated. The handle is injected at
//! construction; there is no module-level state.
//!
//! Records are held bincode-encoded with payloads in remote form, so reads
//! and writes cross the same encode/decode and numeric-coercion boundary a
//! network backend would impose.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crate::error::{CResult, Error};
use crate::prepare::{Pxn, Tsv};
use crate::record::{IdxProjection, LogKey, LogRecord, TxnKey, TxnRecord, SCHEMA_VERSION};
use crate::storage::driver::{CommitMode, Driver};
use crate::value::Value;

#[derive(Default)]
struct Tables {
    log: BTreeMap<(String, Pxn), Vec<u8>>,
    txn: BTreeMap<(String, Tsv), Vec<u8>>,
}

/// Shared backing store for any number of memory drivers.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<String, Tables>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_tables<R>(&self, name: &str, f: impl FnOnce(&mut Tables) -> R) -> R {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(inner.entry(name.to_string()).or_default())
    }
}

/// Driver over one named partition of a [`MemoryStore`].
pub struct MemoryDriver {
    name: String,
    store: MemoryStore,
}

impl MemoryDriver {
    pub fn new(name: impl Into<String>, store: MemoryStore) -> Self {
        MemoryDriver { name: name.into(), store }
    }
}

fn encode_log(rec: &LogRecord) -> CResult<Vec<u8>> {
    let mut remote = rec.clone();
    remote.dat = rec.dat.to_remote();
    remote.idx = rec.idx.iter().map(|(k, v)| (k.clone(), v.to_remote())).collect();
    bincode::serialize(&remote).map_err(|e| Error::Data(format!("log encode: {}", e)))
}

fn encode_txn(rec: &TxnRecord) -> CResult<Vec<u8>> {
    let mut remote = rec.clone();
    remote.dat = rec.dat.to_remote();
    remote.idx = rec.idx.iter().map(|(k, v)| (k.clone(), v.to_remote())).collect();
    bincode::serialize(&remote).map_err(|e| Error::Data(format!("txn encode: {}", e)))
}

fn decode_log(bytes: &[u8]) -> CResult<Option<LogRecord>> {
    let mut rec: LogRecord =
        bincode::deserialize(bytes).map_err(|e| Error::Data(format!("log decode: {}", e)))?;
    if rec.ver != SCHEMA_VERSION {
        return Ok(None);
    }
    rec.dat = rec.dat.to_local();
    rec.idx = rec.idx.iter().map(|(k, v)| (k.clone(), v.to_local())).collect();
    Ok(Some(rec))
}

fn decode_txn(bytes: &[u8]) -> CResult<Option<TxnRecord>> {
    let mut rec: TxnRecord =
        bincode::deserialize(bytes).map_err(|e| Error::Data(format!("txn decode: {}", e)))?;
    if rec.ver != SCHEMA_VERSION {
        return Ok(None);
    }
    rec.dat = rec.dat.to_local();
    rec.idx = rec.idx.iter().map(|(k, v)| (k.clone(), v.to_local())).collect();
    Ok(Some(rec))
}

impl Tables {
    /// The newest committed version of a key with a readable schema.
    fn newest_txn(&self, kid: &str) -> CResult<Option<TxnRecord>> {
        let range = (kid.to_string(), Tsv::ZERO)..=(kid.to_string(), Tsv::MAX);
        for (_, bytes) in self.txn.range(range).rev() {
            if let Some(rec) = decode_txn(bytes)? {
                return Ok(Some(rec));
            }
        }
        Ok(None)
    }
}

impl Driver for MemoryDriver {
    fn get_log(&self, kid: &str, pxn: Option<&Pxn>) -> CResult<Vec<LogRecord>> {
        self.store.with_tables(&self.name, |t| {
            log::debug!(target: "ramp::storage", "getlog {} pxn {:?}", kid, pxn.map(Pxn::to_string));
            if let Some(pxn) = pxn {
                let key = (kid.to_string(), *pxn);
                return match t.log.get(&key) {
                    Some(bytes) => Ok(decode_log(bytes)?.into_iter().collect()),
                    None => Ok(Vec::new()),
                };
            }
            let range = (kid.to_string(), Pxn::ZERO)..=(kid.to_string(), Pxn::MAX);
            let mut out = Vec::new();
            for (_, bytes) in t.log.range(range).rev() {
                if let Some(rec) = decode_log(bytes)? {
                    out.push(rec);
                }
            }
            Ok(out)
        })
    }

    fn get_txn(&self, kid: &str, tsv: Option<Tsv>, limit: Option<usize>) -> CResult<Vec<TxnRecord>> {
        self.store.with_tables(&self.name, |t| {
            log::debug!(target: "ramp::storage", "gettxn {} tsv {:?}", kid, tsv.map(|t| t.to_string()));
            let upper = tsv.unwrap_or(Tsv::MAX);
            let range = (kid.to_string(), Tsv::ZERO)..=(kid.to_string(), upper);
            let mut out = Vec::new();
            for (_, bytes) in t.txn.range(range).rev() {
                if let Some(rec) = decode_txn(bytes)? {
                    out.push(rec);
                    if limit.is_some_and(|l| out.len() >= l) {
                        break;
                    }
                }
            }
            Ok(out)
        })
    }

    fn prepare(&self, kid: &str, val: &LogRecord) -> CResult<LogRecord> {
        self.store.with_tables(&self.name, |t| {
            log::debug!(target: "ramp::storage", "prepare {} pxn {}", kid, val.pxn);
            let bytes = encode_log(val)?;
            let rec = decode_log(&bytes)?
                .ok_or_else(|| Error::Data(format!("prepare {} schema version {}", kid, val.ver)))?;
            t.log.insert((kid.to_string(), val.pxn), bytes);
            Ok(rec)
        })
    }

    fn commit(&self, kid: &str, log: &LogRecord, mode: CommitMode) -> CResult<TxnRecord> {
        self.store.with_tables(&self.name, |t| {
            // Origin lookup, create guard, and the write happen under one
            // lock: the conditional-put equivalent for this backend.
            let cur = t.newest_txn(kid)?;
            let org = match (mode, &cur) {
                (CommitMode::Refresh, Some(c)) => c.org,
                (_, Some(c)) => c.tsv,
                (_, None) => Tsv::ZERO,
            };
            log::debug!(target: "ramp::storage", "commit {} pxn {} org {}", kid, log.pxn, org);

            // The committing record's own timestamp is the commit instant;
            // the session clock may run ahead of the wall clock.
            if mode == CommitMode::Create {
                if let Some(c) = &cur {
                    if !c.is_deleted(log.tsv) {
                        return Err(Error::Exists(format!("key already exists: {}", kid)));
                    }
                }
            }

            let mut txn = TxnRecord::from_log(log, org);
            if mode == CommitMode::Delete {
                txn.dat = Value::Null;
                txn.tmb = txn.tsv;
            }

            let bytes = encode_txn(&txn)?;
            let rec = decode_txn(&bytes)?
                .ok_or_else(|| Error::Data(format!("commit {} schema version {}", kid, txn.ver)))?;
            t.txn.insert((kid.to_string(), txn.tsv), bytes);
            Ok(rec)
        })
    }

    fn scan_log(
        &self,
        kid: Option<&str>,
        tsv: Option<Tsv>,
        limit: Option<usize>,
    ) -> CResult<Vec<LogKey>> {
        self.store.with_tables(&self.name, |t| {
            let mut out = Vec::new();
            for ((key, _), bytes) in t.log.iter() {
                if kid.is_some_and(|k| k != key.as_str()) {
                    continue;
                }
                if let Some(rec) = decode_log(bytes)? {
                    if tsv.is_some_and(|bound| rec.tsv > bound) {
                        continue;
                    }
                    out.push(LogKey { kid: rec.kid, pxn: rec.pxn });
                    if limit.is_some_and(|l| out.len() >= l) {
                        break;
                    }
                }
            }
            Ok(out)
        })
    }

    fn scan_txn(
        &self,
        kid: Option<&str>,
        tsv: Option<Tsv>,
        limit: Option<usize>,
    ) -> CResult<Vec<TxnKey>> {
        self.store.with_tables(&self.name, |t| {
            let mut out = Vec::new();
            for ((key, _), bytes) in t.txn.iter() {
                if kid.is_some_and(|k| k != key.as_str()) {
                    continue;
                }
                if let Some(rec) = decode_txn(bytes)? {
                    if tsv.is_some_and(|bound| rec.tsv > bound) {
                        continue;
                    }
                    out.push(TxnKey { kid: rec.kid, tsv: rec.tsv });
                    if limit.is_some_and(|l| out.len() >= l) {
                        break;
                    }
                }
            }
            Ok(out)
        })
    }

    fn delete_log(&self, kid: &str, pxn: &Pxn) -> CResult<()> {
        self.store.with_tables(&self.name, |t| {
            t.log
                .remove(&(kid.to_string(), *pxn))
                .map(|_| ())
                .ok_or_else(|| Error::NotFound(format!("cannot delete {} pxn {}", kid, pxn)))
        })
    }

    fn delete_txn(&self, kid: &str, tsv: Tsv) -> CResult<()> {
        self.store.with_tables(&self.name, |t| {
            t.txn
                .remove(&(kid.to_string(), tsv))
                .map(|_| ())
                .ok_or_else(|| Error::NotFound(format!("cannot delete {} tsv {}", kid, tsv)))
        })
    }

    fn get_idx(&self, name: &str, value: &Value) -> CResult<Vec<IdxProjection>> {
        self.store.with_tables(&self.name, |t| {
            // probe through the same coercion pipeline as stored values
            let probe = value.to_remote().to_local();
            let now = Tsv::wall();

            // newest version per key; the txn table is ascending by (kid, tsv)
            let mut newest: BTreeMap<String, TxnRecord> = BTreeMap::new();
            for (_, bytes) in t.txn.iter() {
                if let Some(rec) = decode_txn(bytes)? {
                    newest.insert(rec.kid.clone(), rec);
                }
            }

            let mut out = Vec::new();
            for rec in newest.into_values() {
                if rec.is_deleted(now) {
                    continue;
                }
                if rec.idx.get(name) == Some(&probe) {
                    out.push(IdxProjection { kid: rec.kid, tsv: rec.tsv, pxn: rec.pxn });
                }
            }
            Ok(out)
        })
    }

    fn setup(&self) -> CResult<()> {
        // tables materialize on first touch
        self.store.with_tables(&self.name, |_| ());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::prepare::Prepare;

    super::super::tests::test_driver!(MemoryDriver::new("test", MemoryStore::new()));

    fn raw_log(p: &Prepare, kid: &str, ver: u32) -> LogRecord {
        LogRecord {
            kid: kid.to_string(),
            pxn: p.pxn(),
            tsv: p.now(),
            cid: p.cid_str(),
            uid: "0".to_string(),
            rid: "0".to_string(),
            ver,
            met: Vec::new(),
            dat: Value::Int(1),
            idx: BTreeMap::new(),
        }
    }

    #[test]
    fn drivers_share_named_partitions() -> CResult<()> {
        let store = MemoryStore::new();
        let a = MemoryDriver::new("shared", store.clone());
        let b = MemoryDriver::new("shared", store.clone());
        let elsewhere = MemoryDriver::new("other", store);

        let p = Prepare::new(Some(1));
        let log = raw_log(&p, "k", SCHEMA_VERSION);
        a.prepare("k", &log)?;

        assert_eq!(b.get_log("k", None)?.len(), 1);
        assert_eq!(elsewhere.get_log("k", None)?.len(), 0);
        Ok(())
    }

    #[test]
    fn separate_stores_are_isolated() -> CResult<()> {
        let a = MemoryDriver::new("test", MemoryStore::new());
        let b = MemoryDriver::new("test", MemoryStore::new());

        let p = Prepare::new(Some(1));
        let log = raw_log(&p, "k", SCHEMA_VERSION);
        a.prepare("k", &log)?;

        assert_eq!(b.get_log("k", None)?.len(), 0);
        Ok(())
    }

    #[test]
    fn unknown_schema_versions_are_skipped() -> CResult<()> {
        let store = MemoryStore::new();
        let d = MemoryDriver::new("test", store.clone());
        let p = Prepare::new(Some(1));

        // seed a future-schema record directly into the table
        let future = raw_log(&p, "k", SCHEMA_VERSION + 1);
        let bytes = bincode::serialize(&future).expect("encode");
        store.with_tables("test", |t| t.log.insert(("k".to_string(), future.pxn), bytes));

        assert_eq!(d.get_log("k", None)?, Vec::new());
        assert_eq!(d.scan_log(None, None, None)?, Vec::new());
        Ok(())
    }

    #[test]
    fn payload_coercion_round_trip() -> CResult<()> {
        let d = MemoryDriver::new("test", MemoryStore::new());
        let p = Prepare::new(Some(1));

        let mut log = raw_log(&p, "k", SCHEMA_VERSION);
        log.dat = Value::Float(1.5);
        let stored = d.prepare("k", &log)?;
        assert_eq!(stored.dat, Value::Float(1.5));

        log.dat = Value::Float(1.0);
        let stored = d.prepare("k", &log)?;
        // integer-valued floats come back as integers
        assert_eq!(stored.dat, Value::Int(1));
        Ok(())
    }
}
