//! Share to destination mirroring.

pub mod dedup;
pub mod engine;
pub mod tree;

pub use dedup::{DestinationIndex, ExistingDir, dedup_base, is_dedup_suffixed};
pub use engine::{
    ExistingRename, FailureStage, GlobalRule, ItemFailure, MirrorEngine, MirrorError, MirrorOptions,
    TaskReport,
};
pub use tree::{FileCategory, ResultTree, SavedFile};
