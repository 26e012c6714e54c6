//! `ramp-kv` is a client-side coordinator for read-atomic multi-partition
//! transactions over independent key-value backends. Each partition keeps a
//! LOG table of prepared writes and a TXN table of committed versions;
//! writes run a prepare phase followed by a commit phase with the write-set
//! embedded in every prepared record, and reads repair any partially
//! visible transaction by following that write-set into the LOG. There is
//! no server-side transaction manager: a reader observes either all keys of
//! a committed transaction or none of them.
//!
//! ## Getting started
//!
//! ```rust
//! use ramp_kv::client::{Client, Config};
//! use ramp_kv::error::CResult;
//! use ramp_kv::value::Value;
//!
//! fn main() -> CResult<()> {
//!     let client = Client::new(Config::default());
//!
//!     client.create("greeting", Value::from("hello"))?;
//!
//!     let resp = client.get(&["greeting"])?;
//!     assert_eq!(resp.only()?.dat, Value::from("hello"));
//!
//!     client.delete("greeting")?;
//!     assert!(client.get(&["greeting"]).is_err());
//!     Ok(())
//! }
//! ```

pub mod base62;
pub mod client;
pub mod datastore;
pub mod error;
pub mod index;
pub mod meta;
pub mod prepare;
pub mod record;
pub mod response;
pub mod router;
pub mod storage;
pub mod trace;
pub mod value;
