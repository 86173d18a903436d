//! Startup routines. Only logging setup remains a standalone step here —
//! backend connection and cache rebuild are a single call into
//! [`crate::datastore::Datastore::initialize`], since unlike the
//! cluster-era startup sequence this lineage historically split across
//! several `setup_*` modules, there is exactly one backend to bring up.

pub mod setup_logging;

pub use setup_logging::setup_logging;
