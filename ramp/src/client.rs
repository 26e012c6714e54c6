//! The client transaction engine.
//!
//! WRITES
//! ======
//! An atomic write allocates one prepare id for the whole batch, resolves
//! each item's write locations, prepares every (item, location) pair with
//! the rest of the batch embedded as write-set metadata, and only then
//! commits in the same order. A failed prepare aborts before any commit
//! and leaves at most orphan LOG entries, which nothing references. A
//! failed commit after the first success is tolerated: partial visibility
//! is made safe by the read path rather than rolled back.
//!
//! READS
//! =====
//! A read runs two rounds. Round one takes the newest committed version of
//! every requested key from its read locations. Round two inspects the
//! write-sets embedded in those versions: when some observed version names
//! a sibling key at a higher prepare id than the version found for that
//! sibling, the sibling is stale, and the prepared entry is fetched from
//! the named location's LOG instead. Prepared entries are immutable and
//! durable, so the LOG read yields exactly the bytes the lagging commit
//! will eventually publish.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use crate::datastore::{Datastore, DatastoreOptions, SharedIndexes};
use crate::error::{CResult, Error};
use crate::index::IndexDef;
use crate::meta::WriteMeta;
use crate::prepare::{Prepare, Pxn, Tsv};
use crate::record::{IdxProjection, TxnRecord};
use crate::response::Response;
use crate::router::{Action, Router, RouterOne};
use crate::storage::memory::MemoryStore;
use crate::storage::driver::CommitMode;
use crate::storage::Location;
use crate::trace::{default_tracer, Tracer};
use crate::value::Value;

/// One item of an atomic write batch.
#[derive(Clone, Debug, PartialEq)]
pub struct WriteItem {
    pub kid: String,
    pub dat: Value,
}

impl WriteItem {
    pub fn new(kid: impl Into<String>, dat: Value) -> Self {
        WriteItem { kid: kid.into(), dat }
    }
}

/// Per-client configuration. Everything is optional; the defaults give a
/// single-replica client over a fresh in-memory store.
pub struct Config {
    /// Logical dataset name.
    pub name: String,
    /// Region tag used when building default locations.
    pub region: String,
    /// Client id override; random when not given.
    pub cid: Option<u64>,
    /// User id attached to records.
    pub uid: Option<String>,
    /// Request id attached to records.
    pub rid: Option<String>,
    pub trace: Option<Arc<dyn Tracer>>,
    pub router: Option<Box<dyn Router>>,
    /// Backing store handle shared by every memory location this client
    /// opens.
    pub store: MemoryStore,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            name: "ramp".to_string(),
            region: "us-west-2".to_string(),
            cid: None,
            uid: None,
            rid: None,
            trace: None,
            router: None,
            store: MemoryStore::new(),
        }
    }
}

/// A client coordinates transactions for one request context. Use one
/// instance per concurrent request; instances do not share clocks or
/// driver caches.
pub struct Client {
    name: String,
    region: String,
    pxn: Prepare,
    uid: String,
    rid: String,
    rtr: Box<dyn Router>,
    trace: Arc<dyn Tracer>,
    store: MemoryStore,
    indexes: SharedIndexes,
    cons: Mutex<Vec<Arc<Datastore>>>,
}

impl Client {
    pub fn new(config: Config) -> Client {
        let rtr = config
            .router
            .unwrap_or_else(|| Box::new(RouterOne::new(&config.name, &config.region)));
        Client {
            name: config.name,
            region: config.region,
            pxn: Prepare::new(config.cid),
            uid: config.uid.unwrap_or_else(|| "0".to_string()),
            rid: config.rid.unwrap_or_else(|| "0".to_string()),
            rtr,
            trace: config.trace.unwrap_or_else(default_tracer),
            store: config.store,
            indexes: SharedIndexes::default(),
            cons: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Registers an index declaration; visible to every location this
    /// client has opened or will open.
    pub fn add_index(&self, def: IndexDef) {
        self.indexes.lock().unwrap_or_else(|e| e.into_inner()).push(def);
    }

    /// Read-atomic read of one or more keys.
    pub fn get<S: AsRef<str>>(&self, keys: &[S]) -> CResult<Response> {
        if keys.is_empty() {
            return Err(Error::Interface("client get with no keys".to_string()));
        }
        let keys: Vec<&str> = keys.iter().map(AsRef::as_ref).collect();
        log::info!(target: "ramp::client", "get [{}]", keys.join(","));

        // Round 1 - newest commit for each key
        let mut vals: BTreeMap<String, TxnRecord> = BTreeMap::new();
        for k in &keys {
            let val = self.getkey(k)?;
            vals.insert(val.kid.clone(), val);
        }

        // Round 2 - resolve inconsistencies: any write-set entry naming a
        // requested sibling at a higher prepare id pulls that sibling
        // forward out of the LOG
        let kids: Vec<String> = vals.keys().cloned().collect();
        for kid in kids {
            let met = match vals.get(&kid) {
                Some(v) => v.met.clone(),
                None => continue,
            };
            for m in met {
                if vals.get(&m.kid).is_some_and(|cur| cur.pxn < m.pxn) {
                    log::warn!(target: "ramp::client", "get readatomic {} {} {}", m.kid, m.loc, m.pxn);
                    let repaired = self.getlog(&m.kid, &m.loc, &m.pxn)?;
                    vals.insert(m.kid.clone(), repaired);
                }
            }
        }

        let pxn = vals.values().map(|v| v.pxn).max().unwrap_or(Pxn::ZERO);
        Ok(Response { pxn, data: vals })
    }

    /// Writes one key.
    pub fn put(&self, kid: &str, dat: Value) -> CResult<Response> {
        log::info!(target: "ramp::client", "put {}", kid);
        self.put_atomic(vec![WriteItem::new(kid, dat)], CommitMode::Put)
    }

    /// Writes a batch of keys atomically.
    pub fn puts(&self, items: Vec<WriteItem>) -> CResult<Response> {
        log::info!(target: "ramp::client", "puts {}", items.len());
        self.put_atomic(items, CommitMode::Put)
    }

    /// Creates one key; fails with `exists` when a live record is present.
    pub fn create(&self, kid: &str, dat: Value) -> CResult<Response> {
        log::info!(target: "ramp::client", "create {}", kid);
        self.put_atomic(vec![WriteItem::new(kid, dat)], CommitMode::Create)
    }

    /// Creates a batch of keys atomically.
    pub fn creates(&self, items: Vec<WriteItem>) -> CResult<Response> {
        log::info!(target: "ramp::client", "creates {}", items.len());
        self.put_atomic(items, CommitMode::Create)
    }

    /// Deletes a key by committing a tombstone: empty data with a tombstone
    /// timestamp. Reads filter tombstones earlier than now.
    pub fn delete(&self, kid: &str) -> CResult<Response> {
        log::info!(target: "ramp::client", "delete {}", kid);
        self.put_atomic(vec![WriteItem::new(kid, Value::Null)], CommitMode::Delete)
    }

    /// Re-commits the current value of a key on every write location under
    /// the current configuration, e.g. to materialize newly added indexes.
    pub fn refresh(&self, kid: &str) -> CResult<Response> {
        log::info!(target: "ramp::client", "refresh {}", kid);
        let datastores = self.rtr.lookup(Action::Write, kid)?;
        let mut resp = Response::new(Pxn::ZERO);
        for loc in &datastores {
            let con = self.ds_open(loc)?;
            let txn = con.refresh(kid)?;
            resp.pxn = txn.pxn;
            resp.data.insert(kid.to_string(), txn);
        }
        if resp.data.is_empty() {
            return Err(Error::NotFound(format!("key not found in any datastore: {}", kid)));
        }
        Ok(resp)
    }

    /// Committed versions of a key at or before `tsv`, newest first per
    /// location, concatenated across all read locations without dedup.
    pub fn history(&self, kid: &str, tsv: Option<Tsv>, limit: Option<usize>) -> CResult<Vec<TxnRecord>> {
        log::info!(target: "ramp::client", "history {}", kid);
        let datastores = self.rtr.lookup(Action::Read, kid)?;
        let mut out = Vec::new();
        for loc in &datastores {
            out.extend(self.ds_open(loc)?.history(kid, tsv, limit)?);
        }
        Ok(out)
    }

    /// Secondary-index lookup fanned out across all index locations.
    pub fn index(&self, name: &str, value: &Value) -> CResult<Vec<IdxProjection>> {
        log::info!(target: "ramp::client", "index {}", name);
        let datastores = self.rtr.lookup(Action::Index, name)?;
        let mut out = Vec::new();
        for loc in &datastores {
            out.extend(self.ds_open(loc)?.get_idx(name, value)?);
        }
        Ok(out)
    }

    /// The two-phase atomic write. All prepares complete before the first
    /// commit; both phases walk locations and items in the same order.
    pub fn put_atomic(&self, items: Vec<WriteItem>, mode: CommitMode) -> CResult<Response> {
        if items.is_empty() {
            return Err(Error::Interface("put with no items".to_string()));
        }
        let pxn = self.pxn.pxn();

        // per-item write locations, and their union in first-seen order
        let mut routed: Vec<(WriteItem, Vec<String>)> = Vec::with_capacity(items.len());
        let mut datastores: Vec<String> = Vec::new();
        for item in items {
            log::info!(target: "ramp::client", "putatomic {} {}", item.kid, pxn);
            let locs = self.rtr.lookup(Action::Write, &item.kid)?;
            for loc in &locs {
                if !datastores.contains(loc) {
                    datastores.push(loc.clone());
                }
            }
            routed.push((item, locs));
        }

        // a create checks live-record existence before prepare; the commit
        // guard below closes the remaining race
        if mode == CommitMode::Create {
            for (item, locs) in &routed {
                for loc in locs {
                    let con = self.ds_open(loc)?;
                    if !con.get(&item.kid, None, None)?.is_empty() {
                        return Err(Error::Exists(format!("key already exists: {}", item.kid)));
                    }
                }
            }
        }

        for ds in &datastores {
            let con = self.ds_open(ds)?;
            for (item, locs) in &routed {
                if locs.contains(ds) {
                    let met = self.gen_met(&routed, item, locs, ds, &pxn);
                    con.prepare(&item.kid, &pxn, met, &item.dat)?;
                }
            }
        }

        let mut resp = Response::new(pxn);
        for ds in &datastores {
            let con = self.ds_open(ds)?;
            for (item, locs) in &routed {
                if locs.contains(ds) {
                    let txn = con.commit(&item.kid, &pxn, mode)?;
                    resp.data.insert(item.kid.clone(), txn);
                }
            }
        }
        Ok(resp)
    }

    /// The write-set for one participant: every other location of the same
    /// key, and every location of every other key. The participant itself
    /// is locally implicit. Tombstones embed only the intra-key set.
    fn gen_met(
        &self,
        routed: &[(WriteItem, Vec<String>)],
        item: &WriteItem,
        locs: &[String],
        datastore: &str,
        pxn: &Pxn,
    ) -> Vec<WriteMeta> {
        let mut met = Vec::new();
        for loc in locs {
            if loc != datastore {
                met.push(WriteMeta::new(item.kid.clone(), loc.clone(), *pxn));
            }
        }

        if item.dat.is_null() {
            return met;
        }

        for (other, olocs) in routed {
            if other.kid == item.kid {
                continue;
            }
            for loc in olocs {
                met.push(WriteMeta::new(other.kid.clone(), loc.clone(), *pxn));
            }
        }
        met
    }

    fn getkey(&self, key: &str) -> CResult<TxnRecord> {
        let datastores = self.rtr.lookup(Action::Read, key)?;
        log::info!(target: "ramp::client", "getkey {} [{}]", key, datastores.join(","));
        let mut vals = Vec::new();
        for ds in &datastores {
            let con = self.ds_open(ds)?;
            vals.extend(con.get(key, None, None)?);
        }
        if vals.is_empty() {
            return Err(Error::NotFound(format!("key not found in any datastore: {}", key)));
        }
        self.verify(vals)
    }

    fn getlog(&self, key: &str, loc: &str, pxn: &Pxn) -> CResult<TxnRecord> {
        log::info!(target: "ramp::client", "getlog {} {} {}", key, loc, pxn);
        let con = self.ds_open(loc)?;
        let vals = con.get(key, None, Some(pxn))?;
        if vals.is_empty() {
            return Err(Error::NotFound(format!("log not found in any datastore: {}", key)));
        }
        self.verify(vals)
    }

    /// Compares candidates returned from multiple replicas, logs payload
    /// mismatches, and returns the newest.
    fn verify(&self, vals: Vec<TxnRecord>) -> CResult<TxnRecord> {
        let mut iter = vals.into_iter();
        let mut best = iter
            .next()
            .ok_or_else(|| Error::Data("verify with no values".to_string()))?;
        for v in iter {
            if v.dat != best.dat {
                log::warn!(target: "ramp::client", "client validation error A: {} B: {}", best, v);
            }
            if v.tsv > best.tsv {
                best = v;
            }
        }
        Ok(best)
    }

    /// Opens (or returns the cached) datastore for a location, carrying
    /// this client's id, audit fields, tracer, store handle, and index
    /// registry down into it.
    fn ds_open(&self, location: &str) -> CResult<Arc<Datastore>> {
        let loc = Location::from_str(location)?;
        let mut cons = self.cons.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(con) = cons.iter().find(|c| *c.location() == loc) {
            return Ok(con.clone());
        }

        log::info!(target: "ramp::client", "dsopen {}", location);
        let con = Arc::new(Datastore::open(
            location,
            DatastoreOptions {
                store: self.store.clone(),
                trace: self.trace.clone(),
                cid: Some(self.pxn.cid()),
                uid: self.uid.clone(),
                rid: self.rid.clone(),
                indexes: self.indexes.clone(),
            },
        )?);
        cons.push(con.clone());
        Ok(con)
    }
}
