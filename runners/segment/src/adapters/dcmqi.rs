//! 基于 dcmqi `itkimage2segimage` 的 DICOM-SEG 编码.

use super::run_program;
use lung_berry::pipeline::{ClinicalEncoder, EncodeRequest};
use lung_berry::{Error, LabelVolume, Result};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// 临时分割文件名.
const TEMP_SEG: &str = "temp_seg.nii.gz";

/// 调用 `<dcmqi>/bin/itkimage2segimage` 生成 DICOM-SEG.
#[derive(Debug, Clone)]
pub struct DcmqiEncoder {
    bin: Option<PathBuf>,
    add_background_label: bool,
}

impl DcmqiEncoder {
    /// 以 dcmqi 安装位置 `package` 创建编码器.
    ///
    /// `package` 为 `None` 时每次编码都会失败, 从而触发回退输出.
    /// `add_background_label` 为真时, 编码前所有标签加 1.
    pub fn new(package: Option<&Path>, add_background_label: bool) -> Self {
        Self {
            bin: package.map(|p| p.join("bin").join("itkimage2segimage")),
            add_background_label,
        }
    }
}

fn arguments(image: &Path, reference: &Path, output: &Path, metadata: &Path) -> Vec<OsString> {
    vec![
        "--skip".into(),
        "--inputImageList".into(),
        image.into(),
        "--inputDICOMDirectory".into(),
        reference.into(),
        "--outputDICOM".into(),
        output.into(),
        "--inputMetadata".into(),
        metadata.into(),
    ]
}

impl ClinicalEncoder for DcmqiEncoder {
    fn encode(&self, request: &EncodeRequest<'_>) -> Result<PathBuf> {
        let bin = self.bin.as_ref().ok_or_else(|| {
            Error::Encoding(format!("${} is not set", utils::env::DCMQI_ENV))
        })?;
        if !request.reference_series.is_dir() {
            return Err(Error::Encoding(format!(
                "reference series {} does not exist",
                request.reference_series.display()
            )));
        }

        let tmp = tempfile::tempdir()?;
        let image = match request.composite_path {
            Some(p) if !self.add_background_label => p.to_owned(),
            _ => {
                let path = tmp.path().join(TEMP_SEG);
                if self.add_background_label {
                    let shifted = request.composite.data().mapv(|v| v.saturating_add(1));
                    LabelVolume::with_frame_of(request.composite, shifted).save(&path)?;
                } else {
                    request.composite.save(&path)?;
                }
                path
            }
        };

        if let Some(parent) = request.output.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut cmd = Command::new(bin);
        cmd.args(arguments(
            &image,
            request.reference_series,
            request.output,
            request.metadata,
        ));
        run_program(&mut cmd).map_err(Error::Encoding)?;

        if !request.output.is_file() {
            return Err(Error::Encoding(format!(
                "no DICOM-SEG written to {}",
                request.output.display()
            )));
        }
        Ok(request.output.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    fn request<'a>(seg: &'a LabelVolume, dir: &'a Path, output: &'a Path) -> EncodeRequest<'a> {
        EncodeRequest {
            task: "nodules",
            composite: seg,
            composite_path: None,
            reference_series: dir,
            metadata: Path::new("dicom_seg_meta.json"),
            output,
        }
    }

    #[test]
    fn test_arguments() {
        let args = arguments(
            Path::new("seg.nii.gz"),
            Path::new("/in/ct"),
            Path::new("/out/seg.dcm"),
            Path::new("meta.json"),
        );
        let args: Vec<&OsStr> = args.iter().map(OsString::as_os_str).collect();
        assert_eq!(
            args,
            [
                "--skip",
                "--inputImageList",
                "seg.nii.gz",
                "--inputDICOMDirectory",
                "/in/ct",
                "--outputDICOM",
                "/out/seg.dcm",
                "--inputMetadata",
                "meta.json",
            ]
            .map(OsStr::new)
        );
    }

    #[test]
    fn test_without_dcmqi() {
        let dir = tempfile::tempdir().unwrap();
        let seg = LabelVolume::fake(ndarray::Array3::zeros((2, 2, 2)), [1.0, 1.0, 1.0]);
        let output = dir.path().join("seg.dcm");
        let encoder = DcmqiEncoder::new(None, false);
        assert!(matches!(
            encoder.encode(&request(&seg, dir.path(), &output)),
            Err(Error::Encoding(m)) if m.contains("DCMQI_PACKAGE_PATH")
        ));
    }

    #[test]
    fn test_failing_encoder() {
        let dir = tempfile::tempdir().unwrap();
        let seg = LabelVolume::fake(ndarray::Array3::ones((2, 2, 2)), [1.0, 1.0, 1.0]);
        let output = dir.path().join("out").join("seg.dcm");
        let encoder = DcmqiEncoder::new(Some(Path::new("/nonexistent/dcmqi")), true);
        assert!(matches!(
            encoder.encode(&request(&seg, dir.path(), &output)),
            Err(Error::Encoding(m)) if m.contains("itkimage2segimage")
        ));
        assert!(!output.exists());
    }
}
