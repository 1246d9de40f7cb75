use super::VolumeStore;
use crate::consts::NIFTI_EXT;
use crate::{Error, LabelVolume, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// 以目录为底层的卷存储. 每个键对应一个 `{dir}/{key}.nii.gz` 文件.
///
/// 写入时先写 `{key}.partial.nii.gz` 再重命名, 因此 `contains`
/// 为真时文件一定是完整的.
#[derive(Debug, Clone)]
pub struct NiftiStore {
    dir: PathBuf,
}

impl NiftiStore {
    /// 以 `dir` 为根目录打开存储. 目录不存在时会被创建.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_owned();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// 存储根目录.
    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[inline]
    fn path_of(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{NIFTI_EXT}"))
    }
}

impl VolumeStore for NiftiStore {
    #[inline]
    fn contains(&self, key: &str) -> bool {
        self.path_of(key).is_file()
    }

    fn load(&self, key: &str) -> Result<LabelVolume> {
        let path = self.path_of(key);
        if !path.is_file() {
            return Err(Error::MissingVolume(key.to_string()));
        }
        debug!(key, path = %path.display(), "loading volume");
        LabelVolume::open(&path).map_err(|e| match e {
            Error::Store { source, .. } => Error::Store {
                key: key.to_string(),
                source,
            },
            other => other,
        })
    }

    fn save(&self, key: &str, volume: &LabelVolume) -> Result<()> {
        let path = self.path_of(key);
        debug!(key, path = %path.display(), "saving volume");
        volume.save(&path)
    }

    #[inline]
    fn locate(&self, key: &str) -> Option<PathBuf> {
        Some(self.path_of(key))
    }
}
