//! 程序运行函数.

use crate::adapters::{Dcm2NiixIngest, DcmqiEncoder, NnUnetCommand};
use lung_berry::consts::FOLD_CACHE_DIR;
use lung_berry::prelude::*;
use std::path::PathBuf;
use tracing::info;
use utils::env;

/// 外部程序位置.
#[derive(Debug, Clone)]
pub struct Programs {
    /// dcm2niix.
    pub dcm2niix: PathBuf,

    /// nnU-Net 推理程序.
    pub nnunet: PathBuf,

    /// dcmqi 安装目录.
    pub dcmqi: Option<PathBuf>,
}

impl Programs {
    /// 从环境变量解析外部程序位置, 未设置时使用 `PATH` 中的默认程序名.
    pub fn from_env() -> Self {
        Self {
            dcm2niix: env::program_from_env(env::DCM2NIIX_ENV, "dcm2niix"),
            nnunet: env::program_from_env(env::NNUNET_ENV, "nnunet-predict"),
            dcmqi: env::dcmqi_dir_from_env(),
        }
    }
}

/// 实际运行.
pub fn run(
    settings: PipelineSettings,
    programs: &Programs,
    add_background_label: bool,
) -> Result<RunReport> {
    let store = NiftiStore::open(settings.scratch_dir.join(FOLD_CACHE_DIR))?;
    info!(cache = %store.dir().display(), "fold cache ready");

    let ingest = Dcm2NiixIngest::new(&programs.dcm2niix);
    let backend = NnUnetCommand::new(&programs.nnunet);
    let encoder = DcmqiEncoder::new(programs.dcmqi.as_deref(), add_background_label);
    let with = Collaborators {
        ingest: &ingest,
        backend: &backend,
        encoder: &encoder,
        repair: &NoRepair,
        store: &store,
    };

    Orchestrator::new(settings, with)?.run()
}
