//! Profile selection and byte-rate shaping

pub mod profile_store;
pub mod relay;

pub use profile_store::ProfileStore;
pub use relay::{relay, RateLimitedRelay, RelayError, QUOTA_WINDOW, RELAY_CHUNK_SIZE};
