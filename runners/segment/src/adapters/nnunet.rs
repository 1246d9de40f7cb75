//! 基于 nnU-Net 推理程序的折推理.

use super::run_program;
use lung_berry::consts::NIFTI_EXT;
use lung_berry::fold::{InferenceBackend, Task};
use lung_berry::{Error, LabelVolume, Result, StagedCt};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

/// 调用外部 nnU-Net 推理程序完成单折推理.
///
/// 命令行形如 `<program> <checkpoint> --input_file <ct> --prediction_save <tmp>
/// --organ_name <task>_<fold> --fold <k>`, 产物为 `<tmp>/<task>_<fold>.nii.gz`.
#[derive(Debug, Clone)]
pub struct NnUnetCommand {
    program: PathBuf,
}

impl NnUnetCommand {
    /// 以外部程序 `program` 创建后端.
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[inline]
fn organ_name(task: &str, fold: u32) -> String {
    format!("{task}_{fold}")
}

fn arguments(task: &Task, fold: u32, input: &Path, prediction_save: &Path) -> Vec<OsString> {
    vec![
        task.checkpoint().into(),
        "--input_file".into(),
        input.into(),
        "--prediction_save".into(),
        prediction_save.into(),
        "--organ_name".into(),
        organ_name(task.name(), fold).into(),
        "--fold".into(),
        fold.to_string().into(),
    ]
}

impl InferenceBackend for NnUnetCommand {
    fn infer(&self, task: &Task, fold: u32, input: &StagedCt) -> Result<LabelVolume> {
        let failed = |reason: String| Error::InferenceFailed {
            task: task.name().to_string(),
            fold,
            reason,
        };

        let tmp = tempfile::tempdir()?;
        let mut cmd = Command::new(&self.program);
        cmd.args(arguments(task, fold, &input.path, tmp.path()));
        run_program(&mut cmd).map_err(failed)?;

        let produced = tmp
            .path()
            .join(format!("{}.{NIFTI_EXT}", organ_name(task.name(), fold)));
        if !produced.is_file() {
            return Err(failed(format!(
                "no prediction written to {}",
                produced.display()
            )));
        }
        LabelVolume::open(produced)
    }
}
