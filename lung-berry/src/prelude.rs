//! 🫁欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::Idx3d;
pub use crate::{CtScan, LabelVolume, NiftiHeaderAttr, SpatialFrame, StagedCt};
pub use crate::{Error, Result};

pub use crate::consts::label::{BACKGROUND, FINDING, MASK_ON, STRUCTURE};

pub use crate::store::{MemoryStore, NiftiStore, VolumeStore};

pub use crate::fold::{FoldHandle, FoldPool, FoldRunner, InferenceBackend, Task};
pub use crate::fusion::{fuse, LabelMatch, VoteThreshold};
pub use crate::post_proc::{composite, confine, select, Connectivity, SelectionPolicy};

pub use crate::pipeline::{
    ClinicalEncoder, Collaborators, CtIngest, Delivery, EncodeRequest, NoRepair, Orchestrator,
    PipelineSettings, RunReport, SeriesRepair, TaskOutcome,
};

pub use crate::config::Config;
