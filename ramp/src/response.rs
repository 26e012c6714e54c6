use std::collections::BTreeMap;

use crate::error::{CResult, Error};
use crate::prepare::Pxn;
use crate::record::TxnRecord;

/// Result of a client read or write: the batch prepare id plus the record
/// observed or committed for each key.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Response {
    pub pxn: Pxn,
    pub data: BTreeMap<String, TxnRecord>,
}

impl Response {
    pub fn new(pxn: Pxn) -> Self {
        Response { pxn, data: BTreeMap::new() }
    }

    /// The single record of a one-key response.
    pub fn only(&self) -> CResult<&TxnRecord> {
        let mut iter = self.data.values();
        match (iter.next(), iter.next()) {
            (None, _) => Err(Error::NotFound("only with empty response".to_string())),
            (Some(rec), None) => Ok(rec),
            (Some(_), Some(_)) => Err(Error::Data("only cannot be multiple records".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_wants_exactly_one() {
        let mut resp = Response::new(Pxn::new(1, 1));
        assert!(matches!(resp.only(), Err(Error::NotFound(_))));

        resp.data.insert("a".to_string(), TxnRecord::default());
        assert!(resp.only().is_ok());

        resp.data.insert("b".to_string(), TxnRecord::default());
        assert!(matches!(resp.only(), Err(Error::Data(_))));
    }
}
