//! # bd-core: the query layer of BendDash
//!
//! Turns a dashboard filter into one combined round trip against the
//! Databend history tables and reassembles the tagged result rows into
//! typed response envelopes.
//!
//! Flow: [`filter`] → [`sql`] → [`combined`] → [`rows`] →
//! [`lifecycle`] (query history only) → [`envelope`].
//! The inbound operations live in [`service`].

pub mod combined;
pub mod envelope;
pub mod filter;
pub mod lifecycle;
pub mod metrics;
pub mod rows;
pub mod service;
pub mod sql;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use envelope::{Envelope, LogEnvelope, QueryEnvelope};
pub use filter::{FilterRequest, LogFilter, QueryFilter};
pub use metrics::Metrics;
pub use store::{QueryOutput, QueryStore, StoreError};
