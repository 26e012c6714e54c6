use crate::error::CResult;
use crate::prepare::{Pxn, Tsv};
use crate::record::{IdxProjection, LogKey, LogRecord, TxnKey, TxnRecord};
use crate::value::Value;

/// How a prepared write is promoted into the committed table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CommitMode {
    /// Plain overwrite; the new version's origin is the prior version's
    /// timestamp.
    #[default]
    Put,
    /// Succeeds only while no live (non-tombstoned) version exists at the
    /// commit instant.
    Create,
    /// Writes a tombstone: empty payload, `tmb` equal to the version's own
    /// timestamp.
    Delete,
    /// Re-commits an existing version in place, preserving its origin.
    Refresh,
}

/// One partition of one backend type.
///
/// Methods take `&self` and synchronize internally; every call may block on
/// backend I/O. Implementations normalize backend-native failures into the
/// crate error taxonomy and perform the remote/local numeric coercion on
/// their side of the boundary: payloads are stored in remote form and
/// returned in local form.
pub trait Driver: Send + Sync {
    /// LOG entries for a key: all of them newest-first, or the single entry
    /// at `pxn`.
    fn get_log(&self, kid: &str, pxn: Option<&Pxn>) -> CResult<Vec<LogRecord>>;

    /// TXN versions for a key, newest-first. `tsv` is an inclusive upper
    /// bound; `limit` caps the result length.
    fn get_txn(&self, kid: &str, tsv: Option<Tsv>, limit: Option<usize>) -> CResult<Vec<TxnRecord>>;

    /// Unconditional put of a prepared write. Repeating a prepare with an
    /// identical `(kid, pxn)` is idempotent. Returns the persisted record.
    fn prepare(&self, kid: &str, val: &LogRecord) -> CResult<LogRecord>;

    /// Promotes a LOG entry into the TXN table. Reads the current newest
    /// version for the origin timestamp; `Create` must verify tombstone
    /// state atomically with the write.
    fn commit(&self, kid: &str, log: &LogRecord, mode: CommitMode) -> CResult<TxnRecord>;

    /// Administrative key listing of the LOG table.
    fn scan_log(&self, kid: Option<&str>, tsv: Option<Tsv>, limit: Option<usize>)
        -> CResult<Vec<LogKey>>;

    /// Administrative key listing of the TXN table.
    fn scan_txn(&self, kid: Option<&str>, tsv: Option<Tsv>, limit: Option<usize>)
        -> CResult<Vec<TxnKey>>;

    /// Removes one LOG entry; `not-found` when absent.
    fn delete_log(&self, kid: &str, pxn: &Pxn) -> CResult<()>;

    /// Removes one TXN version; `not-found` when absent.
    fn delete_txn(&self, kid: &str, tsv: Tsv) -> CResult<()>;

    /// Probes a secondary index, returning partial projections of the
    /// newest live versions whose promoted attribute matches.
    fn get_idx(&self, name: &str, value: &Value) -> CResult<Vec<IdxProjection>>;

    /// Provisions backing tables where the backend needs it.
    fn setup(&self) -> CResult<()>;
}
