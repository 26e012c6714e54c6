//! Prepare identifiers and the per-process clock.
//!
//! TIMESTAMPS
//! ==========
//! Every record carries a `Tsv`: wall-clock seconds quantized to microseconds.
//! The clock is session-monotonic; when the wall clock fails to advance
//! between two readings, the previous value plus one microsecond is returned
//! instead. TSV ordering is only meaningful within one process.
//!
//! PREPARE IDS
//! ===========
//! A `Pxn` pairs a nanosecond-derived counter with a 48-bit client id.
//! Timestamps should be unique across transactions, and for session
//! consistency, increase on a per-client basis. Given unique client ids, a
//! client id and sequence number form unique transaction identifiers without
//! coordination. Cross-key repair compares `Pxn`s, never TSVs, so the total
//! order (counter first, client id second) is the one invariant the rest of
//! the system leans on.

use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use bigdecimal::{BigDecimal, RoundingMode, ToPrimitive};
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::base62::{base_decode, base_encode};
use crate::error::{CResult, Error};

/// Decimal places in the quantized timestamp form.
pub const TXN_QUANTIZE: i64 = 6;
/// Seconds to nanoseconds, the counter resolution.
pub const TXN_MULTIPLY: u64 = 1_000_000_000;

const MICROS_PER_SEC: u64 = 1_000_000;
const CID_JUST: usize = 9;
const CNT_JUST: usize = 11;
const CID_BITS: u32 = 48;

/// A timestamp value: microsecond-quantized seconds since the Unix epoch.
/// `Tsv::ZERO` doubles as "none" in tombstone and origin fields. The display
/// form is the canonical 6-decimal string; the serialized form is the raw
/// microsecond count.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Tsv(u64);

impl Tsv {
    pub const ZERO: Tsv = Tsv(0);
    pub const MAX: Tsv = Tsv(u64::MAX);

    pub fn from_micros(micros: u64) -> Self {
        Tsv(micros)
    }

    pub fn micros(self) -> u64 {
        self.0
    }

    pub fn add_micros(self, micros: u64) -> Self {
        Tsv(self.0.saturating_add(micros))
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// The current wall clock, quantized. Unlike [`Prepare::now`] this is not
    /// monotonic; it provides the "commit instant" for tombstone checks.
    pub fn wall() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        Tsv(micros)
    }

    pub fn to_decimal(self) -> BigDecimal {
        BigDecimal::from(self.0).with_scale(0) / BigDecimal::from(MICROS_PER_SEC)
    }

    /// Normalizes any decimal seconds value to the quantized form, rounding
    /// half-even past six places. Negative values are caller errors.
    pub fn from_decimal(d: &BigDecimal) -> CResult<Self> {
        let micros = (d * BigDecimal::from(MICROS_PER_SEC))
            .with_scale_round(0, RoundingMode::HalfEven)
            .to_u64()
            .ok_or_else(|| Error::Interface(format!("timestamp out of range: {}", d)))?;
        Ok(Tsv(micros))
    }
}

impl fmt::Display for Tsv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.0 / MICROS_PER_SEC, self.0 % MICROS_PER_SEC)
    }
}

impl FromStr for Tsv {
    type Err = Error;

    fn from_str(s: &str) -> CResult<Self> {
        let d = BigDecimal::from_str(s)
            .map_err(|e| Error::Interface(format!("timestamp {:?}: {}", s, e)))?;
        Tsv::from_decimal(&d)
    }
}

/// A prepare-transaction identifier. Derived `Ord` compares the counter
/// first and breaks ties on client id, which is the protocol total order;
/// note the canonical string form sorts differently (client id leads), so
/// comparisons must never go through the string.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pxn {
    pub cnt: u64,
    pub cid: u64,
}

impl Pxn {
    pub const ZERO: Pxn = Pxn { cnt: 0, cid: 0 };
    pub const MAX: Pxn = Pxn { cnt: u64::MAX, cid: u64::MAX };

    pub fn new(cnt: u64, cid: u64) -> Self {
        Pxn { cnt, cid }
    }

    pub fn is_zero(self) -> bool {
        self == Pxn::ZERO
    }
}

impl fmt::Display for Pxn {
    /// Canonical form: base62 client id right-justified to 9, a dot, base62
    /// counter right-justified to 11.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:0>cid_just$}.{:0>cnt_just$}",
            base_encode(self.cid as u128),
            base_encode(self.cnt as u128),
            cid_just = CID_JUST,
            cnt_just = CNT_JUST,
        )
    }
}

impl FromStr for Pxn {
    type Err = Error;

    fn from_str(s: &str) -> CResult<Self> {
        let (cid, cnt) = s
            .split_once('.')
            .ok_or_else(|| Error::Interface(format!("prepare id incorrect format: {:?}", s)))?;
        let cid = base_decode(cid)?;
        let cnt = base_decode(cnt)?;
        if cid > u64::MAX as u128 || cnt > u64::MAX as u128 {
            return Err(Error::Interface(format!("prepare id out of range: {:?}", s)));
        }
        Ok(Pxn { cnt: cnt as u64, cid: cid as u64 })
    }
}

impl Serialize for Pxn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Pxn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

struct ClockState {
    tsv: Tsv,
    cnt: u64,
}

/// Prepare-id allocator and monotonic clock for one client session.
/// Interior state is mutex-guarded so a single owner may call it from any
/// thread; it is not a coordination point between clients.
pub struct Prepare {
    cid: u64,
    state: Mutex<ClockState>,
}

impl Prepare {
    /// `cid` defaults to a random 48-bit value, the size of a MAC address.
    pub fn new(cid: Option<u64>) -> Self {
        let cid = cid.unwrap_or_else(|| rand::thread_rng().gen::<u64>() >> (64 - CID_BITS));
        Prepare { cid, state: Mutex::new(ClockState { tsv: Tsv::ZERO, cnt: 0 }) }
    }

    pub fn cid(&self) -> u64 {
        self.cid
    }

    /// Client id in its stored base62 string form.
    pub fn cid_str(&self) -> String {
        base_encode(self.cid as u128)
    }

    /// Strictly increasing quantized timestamp. Falls forward one
    /// microsecond at a time when the wall clock stalls or steps back.
    pub fn now(&self) -> Tsv {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut now = Tsv::wall();
        if now <= state.tsv {
            now = state.tsv.add_micros(1);
        }
        state.tsv = now;
        now
    }

    /// Strictly increasing nanosecond counter, derived from the same
    /// quantized clock reading as [`Prepare::now`].
    pub fn cnt(&self) -> u64 {
        let now = self.now().micros().saturating_mul(TXN_MULTIPLY / MICROS_PER_SEC);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let cnt = if now <= state.cnt { state.cnt + 1 } else { now };
        state.cnt = cnt;
        cnt
    }

    /// Allocates the next prepare id for this session.
    pub fn pxn(&self) -> Pxn {
        Pxn { cnt: self.cnt(), cid: self.cid }
    }
}

impl fmt::Debug for Prepare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prepare").field("cid", &self.cid_str()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn now_strictly_increases() {
        let p = Prepare::new(None);
        let mut last = Tsv::ZERO;
        for _ in 0..10_000 {
            let now = p.now();
            assert!(now > last);
            last = now;
        }
    }

    #[test]
    fn cnt_strictly_increases() {
        let p = Prepare::new(None);
        let mut last = 0;
        for _ in 0..10_000 {
            let cnt = p.cnt();
            assert!(cnt > last);
            last = cnt;
        }
    }

    #[test]
    fn pxn_session_monotonic() {
        let p = Prepare::new(Some(42));
        let mut last = Pxn::ZERO;
        for _ in 0..1_000 {
            let pxn = p.pxn();
            assert!(pxn > last);
            last = pxn;
        }
    }

    #[test]
    fn pxn_order_counter_before_cid() {
        assert!(Pxn::new(2, 1) > Pxn::new(1, 9));
        assert!(Pxn::new(5, 1) < Pxn::new(5, 2));
        assert_eq!(Pxn::new(5, 1), Pxn::new(5, 1));
    }

    #[test]
    fn pxn_canonical_form() -> CResult<()> {
        let pxn = Pxn::new(1234567890, 255);
        let s = pxn.to_string();
        let (cid, cnt) = s.split_once('.').expect("dot separator");
        assert_eq!(cid.len(), 9);
        assert_eq!(cnt.len(), 11);
        assert_eq!(cid, "000000047");
        assert_eq!(cnt, "000001LY7VK");
        assert_eq!(Pxn::from_str(&s)?, pxn);
        Ok(())
    }

    #[test]
    fn pxn_parse_rejects_malformed() {
        assert!(Pxn::from_str("no-separator").is_err());
        assert!(Pxn::from_str("a.b.c").is_err());
        assert!(Pxn::from_str("ok.not|base62").is_err());
    }

    #[test]
    fn tsv_display_parse_round_trip() -> CResult<()> {
        let tsv = Tsv::from_micros(1_700_000_000_000_001);
        assert_eq!(tsv.to_string(), "1700000000.000001");
        assert_eq!(Tsv::from_str(&tsv.to_string())?, tsv);
        Ok(())
    }

    #[test]
    fn tsv_quantization_idempotent() -> CResult<()> {
        for s in ["1", "1.0000000001", "1.0000000000001", "1.1", "1700000000.123456789"] {
            let once = Tsv::from_str(s)?;
            let twice = Tsv::from_str(&once.to_string())?;
            assert_eq!(once, twice);
        }
        assert_eq!(Tsv::from_str("1.0000000001")?.to_string(), "1.000000");
        assert_eq!(Tsv::from_str("1.1")?.to_string(), "1.100000");
        Ok(())
    }

    #[test]
    fn tsv_decimal_conversions() -> CResult<()> {
        let tsv = Tsv::from_str("12.345678")?;
        assert_eq!(Tsv::from_decimal(&tsv.to_decimal())?, tsv);
        assert!(Tsv::from_decimal(&BigDecimal::from(-1)).is_err());
        Ok(())
    }

    #[test]
    fn cid_fits_48_bits() {
        for _ in 0..100 {
            let p = Prepare::new(None);
            assert!(p.cid() < 1 << 48);
        }
    }
}
