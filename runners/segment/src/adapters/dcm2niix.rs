//! 基于 dcm2niix 的 CT 转换.

use super::run_program;
use lung_berry::pipeline::CtIngest;
use lung_berry::{CtScan, Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::info;

/// 调用 `dcm2niix -o <tmp> -z y <series>` 转换 DICOM 序列.
#[derive(Debug, Clone)]
pub struct Dcm2NiixIngest {
    program: PathBuf,
}

impl Dcm2NiixIngest {
    /// 以外部程序 `program` 创建转换器.
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl CtIngest for Dcm2NiixIngest {
    fn convert(&self, series_dir: &Path) -> Result<CtScan> {
        if !series_dir.is_dir() {
            return Err(Error::Conversion(format!(
                "series directory {} does not exist",
                series_dir.display()
            )));
        }
        let tmp = tempfile::tempdir()?;
        let mut cmd = Command::new(&self.program);
        cmd.arg("-o")
            .arg(tmp.path())
            .args(["-z", "y"])
            .arg(series_dir);
        run_program(&mut cmd).map_err(Error::Conversion)?;

        let picked = pick_volume(tmp.path())?;
        info!(volume = %picked.display(), "dcm2niix conversion done");
        CtScan::open(picked)
    }
}

/// 从 dcm2niix 的输出目录中挑选 CT 体积.
///
/// 1. 若存在 `*Eq_*.nii.gz` (等间距重采样结果), 则要求其恰好一个;
/// 2. 否则要求 `*.nii.gz` 恰好一个.
fn pick_volume(dir: &Path) -> Result<PathBuf> {
    let mut equalized = Vec::new();
    let mut all = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.ends_with(".nii.gz") {
            continue;
        }
        if name.contains("Eq_") {
            equalized.push(path.clone());
        }
        all.push(path);
    }

    let (mut candidates, pattern) = if equalized.is_empty() {
        (all, "*.nii.gz")
    } else {
        (equalized, "*Eq_*.nii.gz")
    };
    match candidates.len() {
        1 => Ok(candidates.swap_remove(0)),
        n => Err(Error::Conversion(format!(
            "expected 1 {pattern} file, found {n}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::pick_volume;
    use lung_berry::pipeline::CtIngest;
    use lung_berry::Error;
    use std::fs;
    use std::path::Path;

    fn touch(dir: &Path, names: &[&str]) {
        for n in names {
            fs::write(dir.join(n), b"").unwrap();
        }
    }

    #[test]
    fn test_pick_equalized_first() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &["ct_3.nii.gz", "ct_3_Eq_1.nii.gz", "ct_3.json"]);
        assert!(pick_volume(dir.path()).unwrap().ends_with("ct_3_Eq_1.nii.gz"));
    }

    #[test]
    fn test_pick_single() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &["ct_3.nii.gz", "ct_3.json"]);
        assert!(pick_volume(dir.path()).unwrap().ends_with("ct_3.nii.gz"));
    }

    #[test]
    fn test_pick_ambiguous_or_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            pick_volume(dir.path()),
            Err(Error::Conversion(m)) if m.contains("found 0")
        ));

        touch(dir.path(), &["a.nii.gz", "b.nii.gz"]);
        assert!(matches!(
            pick_volume(dir.path()),
            Err(Error::Conversion(m)) if m.contains("found 2")
        ));

        touch(dir.path(), &["a_Eq_1.nii.gz", "b_Eq_1.nii.gz"]);
        assert!(matches!(
            pick_volume(dir.path()),
            Err(Error::Conversion(m)) if m.contains("Eq_")
        ));
    }

    #[test]
    fn test_missing_series_dir() {
        let ingest = super::Dcm2NiixIngest::new("dcm2niix");
        assert!(matches!(
            ingest.convert(Path::new("/nonexistent/series")),
            Err(Error::Conversion(_))
        ));
    }
}
