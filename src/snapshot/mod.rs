//! Local read-only provenance snapshots

mod store;

pub use store::{
    SnapshotError, SnapshotStore, DIFF_SUFFIX, HASH_FILE, PARAMS_FILE, RUN_COMMAND_FILE,
};
