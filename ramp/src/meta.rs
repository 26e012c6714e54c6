//! Write-set metadata embedded in prepared records.

use serde_derive::{Deserialize, Serialize};

use crate::prepare::Pxn;

/// One entry of a record's write-set: another participant of the same
/// atomic transaction, addressed by key, location, and prepare id. The
/// entry for the carrying record itself is omitted (locally implicit).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteMeta {
    pub kid: String,
    pub loc: String,
    pub pxn: Pxn,
}

impl WriteMeta {
    pub fn new(kid: impl Into<String>, loc: impl Into<String>, pxn: Pxn) -> Self {
        WriteMeta { kid: kid.into(), loc: loc.into(), pxn }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construct() {
        let w = WriteMeta::new("k", "memory|r|n", Pxn::new(3, 1));
        assert_eq!(w.kid, "k");
        assert_eq!(w.loc, "memory|r|n");
        assert_eq!(w.pxn, Pxn::new(3, 1));
    }
}
