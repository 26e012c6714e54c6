//! Per-location orchestration: one `Datastore` wraps one driver plus the
//! canonical location, schema version, and its own prepare clock. The
//! client engine opens one per routed location and drives the prepare and
//! commit halves of every write through it.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use crate::error::{CResult, Error};
use crate::index::IndexDef;
use crate::meta::WriteMeta;
use crate::prepare::{Prepare, Pxn, Tsv};
use crate::record::{IdxProjection, LogKey, LogRecord, TxnKey, TxnRecord, SCHEMA_VERSION};
use crate::storage::driver::{CommitMode, Driver};
use crate::storage::memory::MemoryDriver;
use crate::storage::Location;
use crate::trace::{default_tracer, span_attributes, Tracer};
use crate::value::Value;

/// Shared index registry: the client owns it, every datastore it opens
/// holds a handle, so declarations registered later are visible to already
/// open locations.
pub type SharedIndexes = Arc<Mutex<Vec<IndexDef>>>;

/// Construction context for a datastore, carried down from the client.
pub struct DatastoreOptions {
    pub store: crate::storage::memory::MemoryStore,
    pub trace: Arc<dyn Tracer>,
    pub cid: Option<u64>,
    pub uid: String,
    pub rid: String,
    pub indexes: SharedIndexes,
}

impl Default for DatastoreOptions {
    fn default() -> Self {
        DatastoreOptions {
            store: crate::storage::memory::MemoryStore::new(),
            trace: default_tracer(),
            cid: None,
            uid: "0".to_string(),
            rid: "0".to_string(),
            indexes: SharedIndexes::default(),
        }
    }
}

pub struct Datastore {
    location: Location,
    version: u32,
    driver: Box<dyn Driver>,
    pxn: Prepare,
    uid: String,
    rid: String,
    indexes: SharedIndexes,
    trace: Arc<dyn Tracer>,
}

/// Returns the only item of a list; more than one is a structural
/// invariant violation.
pub fn only<T>(mut vals: Vec<T>) -> CResult<Option<T>> {
    match vals.len() {
        0 => Ok(None),
        1 => Ok(vals.pop()),
        n => Err(Error::Data(format!("only cannot be {} objects", n))),
    }
}

pub fn first<T>(vals: Vec<T>) -> Option<T> {
    vals.into_iter().next()
}

impl Datastore {
    /// Resolves a location string and constructs the driver for its backend
    /// type.
    pub fn open(location: &str, opts: DatastoreOptions) -> CResult<Datastore> {
        let location = Location::from_str(location)?;
        let driver: Box<dyn Driver> = match location.dbtype.as_str() {
            "memory" => Box::new(MemoryDriver::new(location.name.clone(), opts.store)),
            _ => {
                return Err(Error::Interface(format!(
                    "unknown datastore in location string: {}",
                    location
                )))
            }
        };
        Ok(Datastore {
            location,
            version: SCHEMA_VERSION,
            driver,
            pxn: Prepare::new(opts.cid),
            uid: opts.uid,
            rid: opts.rid,
            indexes: opts.indexes,
            trace: opts.trace,
        })
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// The qualified location string.
    pub fn loc(&self) -> String {
        self.location.to_string()
    }

    /// Point lookup by `tsv`, LOG lookup by `pxn`, or the newest committed
    /// version with the tombstone filter applied.
    pub fn get(&self, kid: &str, tsv: Option<Tsv>, pxn: Option<&Pxn>) -> CResult<Vec<TxnRecord>> {
        let mut span = self.trace.span("ramp.get");
        span.set_attribute("request.kid", kid);

        if let Some(tsv) = tsv {
            span.set_attribute("request.tsv", &tsv.to_string());
            log::info!(target: "ramp::datastore", "get {} tsv {}", kid, tsv);
            return self.driver.get_txn(kid, Some(tsv), Some(1));
        }
        if let Some(pxn) = pxn {
            span.set_attribute("request.pxn", &pxn.to_string());
            log::info!(target: "ramp::datastore", "get {} pxn {}", kid, pxn);
            let logs = self.driver.get_log(kid, Some(pxn))?;
            return Ok(logs.iter().map(|l| TxnRecord::from_log(l, Tsv::ZERO)).collect());
        }

        log::info!(target: "ramp::datastore", "get {}", kid);
        Ok(self.filter_deleted(self.driver.get_txn(kid, None, Some(1))?, None))
    }

    /// Builds the LOG value for a write and persists it through the driver.
    pub fn prepare(
        &self,
        kid: &str,
        pxn: &Pxn,
        met: Vec<WriteMeta>,
        dat: &Value,
    ) -> CResult<LogRecord> {
        let mut span = self.trace.span("ramp.prepare");
        span.set_attribute("request.kid", kid);
        span.set_attribute("request.pxn", &pxn.to_string());
        log::info!(target: "ramp::datastore", "prepare {} pxn {}", kid, pxn);

        let val = self.prepare_val(kid, pxn, met, dat)?;
        let rec = self.driver.prepare(kid, &val)?;
        span_attributes(span.as_mut(), "response", &rec.meta_value());
        Ok(rec)
    }

    /// Reads the unique LOG entry back and promotes it into the TXN table.
    pub fn commit(&self, kid: &str, pxn: &Pxn, mode: CommitMode) -> CResult<TxnRecord> {
        let mut span = self.trace.span("ramp.commit");
        span.set_attribute("request.kid", kid);
        span.set_attribute("request.pxn", &pxn.to_string());

        let log = only(self.driver.get_log(kid, Some(pxn))?)?
            .ok_or_else(|| Error::NotFound(format!("log not found: {} pxn {}", kid, pxn)))?;
        log::info!(target: "ramp::datastore", "commit {} pxn {} org {}", kid, pxn, log.tsv);

        let txn = self.driver.commit(kid, &log, mode)?;
        span_attributes(span.as_mut(), "response", &txn.meta_value());
        Ok(txn)
    }

    /// Re-commits the current version under the current index
    /// configuration, preserving its prepare id and origin. Falls back to
    /// rebuilding the LOG value from the TXN when the entry was pruned.
    pub fn refresh(&self, kid: &str) -> CResult<TxnRecord> {
        let mut span = self.trace.span("ramp.refresh");
        span.set_attribute("request.kid", kid);
        log::info!(target: "ramp::datastore", "refresh {}", kid);

        let cur = only(self.filter_deleted(self.driver.get_txn(kid, None, Some(1))?, None))?
            .ok_or_else(|| Error::NotFound(format!("key not found: {}", kid)))?;

        let mut log = match self.driver.get_log(kid, Some(&cur.pxn)) {
            Ok(logs) => only(logs)?.unwrap_or_else(|| cur.to_log()),
            Err(Error::NotFound(_)) => cur.to_log(),
            Err(e) => return Err(e),
        };
        log.idx = self.index_values(&log.dat);

        self.driver.prepare(kid, &log)?;
        let txn = self.driver.commit(kid, &log, CommitMode::Refresh)?;
        span_attributes(span.as_mut(), "response", &txn.meta_value());
        Ok(txn)
    }

    /// Committed versions at or before `tsv`, newest first.
    pub fn history(&self, kid: &str, tsv: Option<Tsv>, limit: Option<usize>) -> CResult<Vec<TxnRecord>> {
        let mut span = self.trace.span("ramp.history");
        span.set_attribute("request.kid", kid);
        log::info!(target: "ramp::datastore", "history {}", kid);
        self.driver.get_txn(kid, tsv, limit)
    }

    /// Secondary-index probe.
    pub fn get_idx(&self, name: &str, value: &Value) -> CResult<Vec<IdxProjection>> {
        let mut span = self.trace.span("ramp.get_idx");
        span.set_attribute("request.index", name);
        log::info!(target: "ramp::datastore", "getidx {}", name);
        self.driver.get_idx(name, value)
    }

    pub fn scan_log(
        &self,
        kid: Option<&str>,
        tsv: Option<Tsv>,
        limit: Option<usize>,
    ) -> CResult<Vec<LogKey>> {
        let mut span = self.trace.span("ramp.scan_log");
        span.set_attribute("request.kid", kid.unwrap_or_default());
        self.driver.scan_log(kid, tsv, limit)
    }

    pub fn scan_txn(
        &self,
        kid: Option<&str>,
        tsv: Option<Tsv>,
        limit: Option<usize>,
    ) -> CResult<Vec<TxnKey>> {
        let mut span = self.trace.span("ramp.scan_txn");
        span.set_attribute("request.kid", kid.unwrap_or_default());
        self.driver.scan_txn(kid, tsv, limit)
    }

    pub fn delete_log(&self, kid: &str, pxn: &Pxn) -> CResult<()> {
        let mut span = self.trace.span("ramp.delete_log");
        span.set_attribute("request.kid", kid);
        span.set_attribute("request.pxn", &pxn.to_string());
        self.driver.delete_log(kid, pxn)
    }

    pub fn delete_txn(&self, kid: &str, tsv: Tsv) -> CResult<()> {
        let mut span = self.trace.span("ramp.delete_txn");
        span.set_attribute("request.kid", kid);
        span.set_attribute("request.tsv", &tsv.to_string());
        self.driver.delete_txn(kid, tsv)
    }

    pub fn setup(&self) -> CResult<()> {
        self.driver.setup()
    }

    /// A write-set entry addressing this location.
    pub fn meta(&self, kid: &str, pxn: &Pxn) -> WriteMeta {
        WriteMeta::new(kid, self.loc(), *pxn)
    }

    /// Fully qualifies metadata: every entry must carry a key and prepare
    /// id; a missing location defaults to this datastore.
    pub fn canon_metadata(&self, met: Vec<WriteMeta>) -> CResult<Vec<WriteMeta>> {
        let mut out = Vec::with_capacity(met.len());
        for mut m in met {
            if m.kid.is_empty() {
                return Err(Error::Interface("metadata missing key id".to_string()));
            }
            if m.pxn.is_zero() {
                return Err(Error::Interface("metadata missing prepare id".to_string()));
            }
            if m.loc.is_empty() {
                m.loc = self.loc();
            }
            out.push(m);
        }
        Ok(out)
    }

    /// Drops records whose tombstone lies strictly in the past of `tsv`
    /// (the current clock when not given). The strict comparison keeps a
    /// record live at its own commit instant.
    pub fn filter_deleted(&self, txns: Vec<TxnRecord>, tsv: Option<Tsv>) -> Vec<TxnRecord> {
        let tsv = tsv.unwrap_or_else(|| self.pxn.now());
        txns.into_iter().filter(|t| !t.is_deleted(tsv)).collect()
    }

    fn index_values(&self, dat: &Value) -> BTreeMap<String, Value> {
        let mut idx = BTreeMap::new();
        let indexes = self.indexes.lock().unwrap_or_else(|e| e.into_inner());
        for def in indexes.iter() {
            if let Some(v) = def.extract(dat) {
                idx.insert(def.name.clone(), v);
            }
        }
        idx
    }

    fn prepare_val(
        &self,
        kid: &str,
        pxn: &Pxn,
        met: Vec<WriteMeta>,
        dat: &Value,
    ) -> CResult<LogRecord> {
        Ok(LogRecord {
            kid: kid.to_string(),
            pxn: *pxn,
            tsv: self.pxn.now(),
            cid: self.pxn.cid_str(),
            uid: self.uid.clone(),
            rid: self.rid.clone(),
            ver: self.version,
            met: self.canon_metadata(met)?,
            dat: dat.clone(),
            idx: self.index_values(dat),
        })
    }
}
