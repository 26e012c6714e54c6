pub mod driver;
pub mod memory;

use std::fmt;
use std::str::FromStr;

use crate::error::{CResult, Error};

pub const DELIMITER: char = '|';

/// A fully qualified partition location: `"<dbtype>|<region>|<name>"`,
/// exactly three parts.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Location {
    pub dbtype: String,
    pub region: String,
    pub name: String,
}

impl Location {
    pub fn new(dbtype: impl Into<String>, region: impl Into<String>, name: impl Into<String>) -> Self {
        Location { dbtype: dbtype.into(), region: region.into(), name: name.into() }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}{}{}", self.dbtype, DELIMITER, self.region, DELIMITER, self.name)
    }
}

impl FromStr for Location {
    type Err = Error;

    fn from_str(s: &str) -> CResult<Self> {
        let parts: Vec<&str> = s.split(DELIMITER).collect();
        if parts.len() != 3 {
            return Err(Error::Interface(format!("location string incorrect format: {:?}", s)));
        }
        Ok(Location::new(parts[0], parts[1], parts[2]))
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn location_round_trip() -> CResult<()> {
        let loc = Location::from_str("memory|mem-1|data")?;
        assert_eq!(loc, Location::new("memory", "mem-1", "data"));
        assert_eq!(loc.to_string(), "memory|mem-1|data");
        Ok(())
    }

    #[test]
    fn location_rejects_wrong_arity() {
        assert!(Location::from_str("memory|mem-1").is_err());
        assert!(Location::from_str("memory|mem-1|data|extra").is_err());
        assert!(Location::from_str("").is_err());
    }

    /// Generates the contract suite for any Driver implementation. The
    /// calling module provides the imports the suite references.
    macro_rules! test_driver {
        ($setup:expr) => {
            fn fixture_log(p: &Prepare, kid: &str, dat: Value) -> LogRecord {
                LogRecord {
                    kid: kid.to_string(),
                    pxn: p.pxn(),
                    tsv: p.now(),
                    cid: p.cid_str(),
                    uid: "0".to_string(),
                    rid: "0".to_string(),
                    ver: SCHEMA_VERSION,
                    met: Vec::new(),
                    dat,
                    idx: BTreeMap::new(),
                }
            }

            #[test]
            fn prepare_and_get_log() -> CResult<()> {
                let d = $setup;
                let p = Prepare::new(Some(1));

                let first = fixture_log(&p, "a", Value::Int(1));
                d.prepare("a", &first)?;
                let second = fixture_log(&p, "a", Value::Int(2));
                d.prepare("a", &second)?;

                // point lookup
                let got = d.get_log("a", Some(&first.pxn))?;
                assert_eq!(got.len(), 1);
                assert_eq!(got[0].pxn, first.pxn);
                assert_eq!(got[0].dat, Value::Int(1));

                // newest first without a pxn
                let all = d.get_log("a", None)?;
                assert_eq!(all.len(), 2);
                assert_eq!(all[0].pxn, second.pxn);
                assert_eq!(all[1].pxn, first.pxn);

                assert_eq!(d.get_log("missing", None)?, Vec::new());
                Ok(())
            }

            #[test]
            fn prepare_idempotent() -> CResult<()> {
                let d = $setup;
                let p = Prepare::new(Some(1));
                let log = fixture_log(&p, "a", Value::Int(1));
                d.prepare("a", &log)?;
                d.prepare("a", &log)?;
                assert_eq!(d.scan_log(Some("a"), None, None)?.len(), 1);
                Ok(())
            }

            #[test]
            fn commit_origin_chain() -> CResult<()> {
                let d = $setup;
                let p = Prepare::new(Some(1));

                let first = fixture_log(&p, "a", Value::Int(1));
                d.prepare("a", &first)?;
                let t1 = d.commit("a", &first, CommitMode::Put)?;
                assert_eq!(t1.org, Tsv::ZERO);
                assert_eq!(t1.tsv, first.tsv);
                assert_eq!(t1.pxn, first.pxn);

                let second = fixture_log(&p, "a", Value::Int(2));
                d.prepare("a", &second)?;
                let t2 = d.commit("a", &second, CommitMode::Put)?;
                assert_eq!(t2.org, t1.tsv);
                assert!(t2.tsv > t1.tsv);
                Ok(())
            }

            #[test]
            fn commit_create_conflict() -> CResult<()> {
                let d = $setup;
                let p = Prepare::new(Some(1));

                let log = fixture_log(&p, "a", Value::Int(1));
                d.prepare("a", &log)?;
                d.commit("a", &log, CommitMode::Create)?;

                let again = fixture_log(&p, "a", Value::Int(2));
                d.prepare("a", &again)?;
                assert!(matches!(
                    d.commit("a", &again, CommitMode::Create),
                    Err(Error::Exists(_))
                ));

                // a tombstone clears the conflict
                let del = fixture_log(&p, "a", Value::Null);
                d.prepare("a", &del)?;
                d.commit("a", &del, CommitMode::Delete)?;
                let after = fixture_log(&p, "a", Value::Int(3));
                d.prepare("a", &after)?;
                d.commit("a", &after, CommitMode::Create)?;
                Ok(())
            }

            #[test]
            fn commit_delete_tombstone() -> CResult<()> {
                let d = $setup;
                let p = Prepare::new(Some(1));

                let log = fixture_log(&p, "a", Value::Int(1));
                d.prepare("a", &log)?;
                d.commit("a", &log, CommitMode::Put)?;

                let del = fixture_log(&p, "a", Value::Null);
                d.prepare("a", &del)?;
                let txn = d.commit("a", &del, CommitMode::Delete)?;
                assert_eq!(txn.tmb, txn.tsv);
                assert!(txn.dat.is_null());
                Ok(())
            }

            #[test]
            fn commit_refresh_preserves_origin() -> CResult<()> {
                let d = $setup;
                let p = Prepare::new(Some(1));

                let first = fixture_log(&p, "a", Value::Int(1));
                d.prepare("a", &first)?;
                d.commit("a", &first, CommitMode::Put)?;
                let second = fixture_log(&p, "a", Value::Int(2));
                d.prepare("a", &second)?;
                let t2 = d.commit("a", &second, CommitMode::Put)?;
                assert_eq!(t2.org, first.tsv);

                let refreshed = d.commit("a", &second, CommitMode::Refresh)?;
                assert_eq!(refreshed.org, t2.org);
                assert_eq!(refreshed.tsv, t2.tsv);
                assert_eq!(d.get_txn("a", None, None)?.len(), 2);
                Ok(())
            }

            #[test]
            fn get_txn_bound_and_limit() -> CResult<()> {
                let d = $setup;
                let p = Prepare::new(Some(1));

                let mut tsvs = Vec::new();
                for i in 0..3 {
                    let log = fixture_log(&p, "a", Value::Int(i));
                    d.prepare("a", &log)?;
                    tsvs.push(d.commit("a", &log, CommitMode::Put)?.tsv);
                }

                let newest = d.get_txn("a", None, Some(1))?;
                assert_eq!(newest.len(), 1);
                assert_eq!(newest[0].tsv, tsvs[2]);

                let bounded = d.get_txn("a", Some(tsvs[1]), None)?;
                assert_eq!(bounded.len(), 2);
                assert_eq!(bounded[0].tsv, tsvs[1]);
                assert_eq!(bounded[1].tsv, tsvs[0]);
                Ok(())
            }

            #[test]
            fn scan_and_delete() -> CResult<()> {
                let d = $setup;
                let p = Prepare::new(Some(1));

                for kid in ["a", "b"] {
                    let log = fixture_log(&p, kid, Value::Int(1));
                    d.prepare(kid, &log)?;
                    d.commit(kid, &log, CommitMode::Put)?;
                }

                let logs = d.scan_log(None, None, None)?;
                assert_eq!(logs.len(), 2);
                let txns = d.scan_txn(None, None, None)?;
                assert_eq!(txns.len(), 2);

                for l in logs {
                    d.delete_log(&l.kid, &l.pxn)?;
                }
                for t in txns {
                    d.delete_txn(&t.kid, t.tsv)?;
                }
                assert_eq!(d.scan_log(None, None, None)?, Vec::new());
                assert_eq!(d.scan_txn(None, None, None)?, Vec::new());

                assert!(matches!(d.delete_txn("a", Tsv::MAX), Err(Error::NotFound(_))));
                Ok(())
            }

            #[test]
            fn get_idx_matches_live_records() -> CResult<()> {
                let d = $setup;
                let p = Prepare::new(Some(1));

                let mut log = fixture_log(&p, "a", Value::from("payload"));
                log.idx.insert("color".to_string(), Value::from("red"));
                d.prepare("a", &log)?;
                d.commit("a", &log, CommitMode::Put)?;

                let mut other = fixture_log(&p, "b", Value::from("payload"));
                other.idx.insert("color".to_string(), Value::from("blue"));
                d.prepare("b", &other)?;
                d.commit("b", &other, CommitMode::Put)?;

                let hits = d.get_idx("color", &Value::from("red"))?;
                assert_eq!(hits.len(), 1);
                assert_eq!(hits[0].kid, "a");
                assert_eq!(hits[0].pxn, log.pxn);

                assert_eq!(d.get_idx("color", &Value::from("green"))?, Vec::new());
                Ok(())
            }
        };
    }

    pub(super) use test_driver; // export for use in submodules
}
