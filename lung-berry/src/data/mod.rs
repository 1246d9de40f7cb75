use std::fs;
use std::ops::{Index, IndexMut};
use std::path::{Path, PathBuf};

use ndarray::{Array3, ArrayView, ArrayViewMut, Ix3};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use crate::consts::label::*;
use crate::{Error, Idx3d, Result};

mod frame;

pub use frame::{SpatialFrame, FRAME_TOLERANCE};

/// `NiftiHeader` 是栈上大对象, 移动该对象的开销很可观.
/// 因此我们将其分配到堆上.
type BoxedHeader = Box<NiftiHeader>;

/// 基于 `reference` 构造与 `(z, h, w)` 形状匹配的 header.
///
/// 标签与重新写出的扫描都不再需要缩放, 因此 `scl_slope`, `scl_inter` 被重置.
fn derive_header(reference: &NiftiHeader, (z, h, w): Idx3d) -> BoxedHeader {
    let mut header = Box::new(reference.clone());
    header.dim[0] = 3;
    header.dim[1] = w as _;
    header.dim[2] = h as _;
    header.dim[3] = z as _;
    for d in header.dim.iter_mut().skip(4) {
        *d = 1;
    }
    header.scl_slope = 1.0;
    header.scl_inter = 0.0;
    header
}

/// 把最终路径 `a/b.nii.gz` 映射为临时路径 `a/b.partial.nii.gz`.
///
/// 临时文件保留原扩展名, 以便 nifti 写入端选择同样的压缩方式.
pub(crate) fn partial_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let partial = [".nii.gz", ".nii"]
        .iter()
        .find_map(|ext| {
            name.strip_suffix(ext)
                .map(|base| format!("{base}.partial{ext}"))
        })
        .unwrap_or_else(|| format!("{name}.partial"));
    path.with_file_name(partial)
}

/// 先写入临时文件, 再重命名为 `path`. 读者永远不会观察到写了一半的文件.
fn write_then_rename<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&Path) -> nifti::Result<()>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = partial_path(path);
    if let Err(e) = write(&tmp) {
        let _ = fs::remove_file(&tmp);
        return Err(Error::store(&path.display().to_string(), e));
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// 3D nii 体积的共用属性和部分通用操作.
pub trait NiftiHeaderAttr {
    /// 获取 header 部分.
    fn header(&self) -> &NiftiHeader;

    /// 获取数据形状大小 `(z, h, w)`.
    fn shape(&self) -> Idx3d;

    /// 获取单个体素分辨率. 以毫米为单位, 分别代表 z, 高, 宽方向.
    #[inline]
    fn pix_dim(&self) -> [f64; 3] {
        let [_, w, h, z, ..] = self.header().pixdim;
        [z as f64, h as f64, w as f64]
    }

    /// 获取空间坐标系.
    #[inline]
    fn frame(&self) -> SpatialFrame {
        SpatialFrame::from_header(self.header())
    }

    /// 与 `other` 是否共享形状和空间坐标系?
    fn is_co_registered<T: NiftiHeaderAttr + ?Sized>(&self, other: &T) -> bool {
        self.shape() == other.shape() && self.frame().approx_eq(&other.frame(), FRAME_TOLERANCE)
    }

    /// 同 [`Self::is_co_registered`], 但在不一致时返回 [`Error::ShapeMismatch`].
    ///
    /// `self` 被视为期望值, `context` 描述发生比较的位置.
    fn ensure_co_registered<T: NiftiHeaderAttr + ?Sized>(
        &self,
        other: &T,
        context: &str,
    ) -> Result<()> {
        if self.is_co_registered(other) {
            Ok(())
        } else {
            let context = if self.shape() == other.shape() {
                format!("{context} (spatial frame differs)")
            } else {
                context.to_string()
            };
            Err(Error::ShapeMismatch {
                context,
                expected: self.shape(),
                found: other.shape(),
            })
        }
    }
}

/// 通过 nifti 打开 3D 数据并转换为 `(z, H, W)` 布局.
macro_rules! open_volume {
    ($path: expr, $elem: ty) => {{
        let path: &Path = $path;
        let key = path.display().to_string();
        let obj = ReaderOptions::new()
            .read_file(path)
            .map_err(|e| Error::store(&key, e))?;
        let header = Box::new(obj.header().clone());

        // [W, H, z] -> [z, H, W].
        // hint: 原第一维向下增长, 原第二维向右增长.
        let data = obj
            .into_volume()
            .into_ndarray::<$elem>()
            .map_err(|e| Error::store(&key, e))?
            .into_dimensionality::<Ix3>()
            .map_err(|e| Error::store(&key, e))?
            .permuted_axes([2, 1, 0]);
        let data = data.as_standard_layout().into_owned();
        (header, data)
    }};
}

/// nii 格式 3D CT 扫描, 包括 header 和 CT 扫描 (HU). HU 值以 `f32` 保存.
#[derive(Debug, Clone)]
pub struct CtScan {
    header: BoxedHeader,
    data: Array3<f32>,
}

impl NiftiHeaderAttr for CtScan {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }

    #[inline]
    fn shape(&self) -> Idx3d {
        self.data.dim()
    }
}

impl Index<Idx3d> for CtScan {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl CtScan {
    /// 打开 nii 文件格式的 3D CT 扫描. `path` 为 nii 文件的本地路径.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let (header, data) = open_volume!(path.as_ref(), f32);
        Ok(Self { header, data })
    }

    /// 根据 `(z, h, w)` 布局的裸数据和体素分辨率 `[w, h, z]` 直接创建扫描.
    ///
    /// # 注意
    ///
    /// 该方法创建的 header 只有形状与分辨率信息, 你应仅将其用于实验或测试目的.
    pub fn fake(data: Array3<f32>, pix_dim: [f32; 3]) -> Self {
        let mut reference = NiftiHeader::default();
        let [_, pw, ph, pz, ..] = &mut reference.pixdim;
        (*pw, *ph, *pz) = (pix_dim[0], pix_dim[1], pix_dim[2]);
        reference.intent_name[..4].copy_from_slice(b"fake");
        let header = derive_header(&reference, data.dim());
        Self { header, data }
    }

    /// 以原子方式写为 nii 文件.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let header = derive_header(&self.header, self.shape());
        write_then_rename(path.as_ref(), |tmp| {
            WriterOptions::new(tmp)
                .reference_header(&header)
                .write_nifti(&self.data.view().permuted_axes([2, 1, 0]))
        })
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, f32, Ix3> {
        self.data.view()
    }
}

/// nii 格式 3D 标签体积 (掩膜或多标签分割). 标签值以 `u8` 保存.
#[derive(Debug, Clone)]
pub struct LabelVolume {
    header: BoxedHeader,
    data: Array3<u8>,
}

impl NiftiHeaderAttr for LabelVolume {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }

    #[inline]
    fn shape(&self) -> Idx3d {
        self.data.dim()
    }
}

impl Index<Idx3d> for LabelVolume {
    type Output = u8;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl IndexMut<Idx3d> for LabelVolume {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl PartialEq for LabelVolume {
    /// 数据一致且空间坐标系一致即视为相等.
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data && self.frame().approx_eq(&other.frame(), FRAME_TOLERANCE)
    }
}

impl LabelVolume {
    /// 打开 nii 文件格式的 3D 标签. `path` 为 nii 文件的本地路径.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let (header, data) = open_volume!(path.as_ref(), u8);
        Ok(Self { header, data })
    }

    /// 以 `reference` 的空间坐标系包装 `(z, h, w)` 布局的裸标签数据.
    ///
    /// `data` 的形状应与 `reference` 一致, 否则结果不再与其 co-registered.
    pub fn with_frame_of<T: NiftiHeaderAttr + ?Sized>(reference: &T, data: Array3<u8>) -> Self {
        let header = derive_header(reference.header(), data.dim());
        Self { header, data }
    }

    /// 根据 `(z, h, w)` 布局的裸标签数据和体素分辨率 `[w, h, z]` 直接创建标签体积.
    ///
    /// # 注意
    ///
    /// 该方法可能会创建与任何扫描都不一致的实体, 因此你应仅将其用于实验或测试目的.
    pub fn fake(data: Array3<u8>, pix_dim: [f32; 3]) -> Self {
        let mut reference = NiftiHeader::default();
        let [_, pw, ph, pz, ..] = &mut reference.pixdim;
        (*pw, *ph, *pz) = (pix_dim[0], pix_dim[1], pix_dim[2]);
        reference.intent_name[..4].copy_from_slice(b"fake");
        let header = derive_header(&reference, data.dim());
        Self { header, data }
    }

    /// 以原子方式写为 nii 文件.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let header = derive_header(&self.header, self.shape());
        write_then_rename(path.as_ref(), |tmp| {
            WriterOptions::new(tmp)
                .reference_header(&header)
                .write_nifti(&self.data.view().permuted_axes([2, 1, 0]))
        })
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, u8, Ix3> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut<'_, u8, Ix3> {
        self.data.view_mut()
    }

    /// 获取值为 `label` 的体素个数.
    #[inline]
    pub fn count(&self, label: u8) -> usize {
        self.data.iter().filter(|p| **p == label).count()
    }

    /// 获取前景 (任意非零标签) 体素个数.
    #[inline]
    pub fn foreground_count(&self) -> usize {
        self.data.iter().filter(|p| is_foreground(**p)).count()
    }

    /// 是否全为背景?
    #[inline]
    pub fn is_background(&self) -> bool {
        self.data.iter().all(|p| is_background(*p))
    }
}

/// 已暂存到磁盘的 CT 扫描.
///
/// 进程型推理后端需要读取文件, 内存型后端则直接使用 `scan`.
#[derive(Debug, Clone)]
pub struct StagedCt {
    /// 扫描本体.
    pub scan: CtScan,

    /// 暂存的 nii 文件路径.
    pub path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::{partial_path, CtScan, LabelVolume, NiftiHeaderAttr};
    use crate::Error;
    use ndarray::Array3;
    use std::path::Path;

    #[test]
    fn test_partial_path_keeps_extension() {
        assert_eq!(
            partial_path(Path::new("/tmp/folds/nodules_0.nii.gz")),
            Path::new("/tmp/folds/nodules_0.partial.nii.gz")
        );
        assert_eq!(
            partial_path(Path::new("a.nii")),
            Path::new("a.partial.nii")
        );
        assert_eq!(partial_path(Path::new("a.bin")), Path::new("a.bin.partial"));
    }

    #[test]
    fn test_co_registration() {
        let a = LabelVolume::fake(Array3::zeros((2, 3, 4)), [0.8, 0.8, 2.0]);
        let b = LabelVolume::fake(Array3::ones((2, 3, 4)), [0.8, 0.8, 2.0]);
        let c = LabelVolume::fake(Array3::zeros((2, 3, 5)), [0.8, 0.8, 2.0]);
        let d = LabelVolume::fake(Array3::zeros((2, 3, 4)), [0.8, 0.8, 1.0]);
        assert!(a.is_co_registered(&b));
        assert!(a.ensure_co_registered(&b, "test").is_ok());

        let err = a.ensure_co_registered(&c, "test").unwrap_err();
        assert!(matches!(
            err,
            Error::ShapeMismatch { expected: (2, 3, 4), found: (2, 3, 5), .. }
        ));

        let Err(Error::ShapeMismatch { context, .. }) = a.ensure_co_registered(&d, "test") else {
            panic!("frame difference must be reported");
        };
        assert!(context.contains("spatial frame"));
    }

    #[test]
    fn test_with_frame_of_scan() {
        let ct = CtScan::fake(Array3::zeros((2, 2, 2)), [0.7, 0.7, 1.25]);
        let label = LabelVolume::with_frame_of(&ct, Array3::ones((2, 2, 2)));
        assert!(ct.is_co_registered(&label));
        assert_eq!(label.foreground_count(), 8);
        let w = 0.7f32 as f64;
        assert_eq!(label.pix_dim(), [1.25, w, w]);
    }

    #[test]
    fn test_label_count() {
        let mut v = LabelVolume::fake(Array3::from_elem((1, 2, 3), 9), [1.0, 1.0, 1.0]);
        v[(0, 1, 2)] = 0;
        assert_eq!(v.count(9), 5);
        assert_eq!(v.foreground_count(), 5);
        assert!(!v.is_background());
    }

    #[test]
    fn test_save_and_open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mask.nii.gz");
        let mut data = Array3::zeros((3, 4, 5));
        data[(1, 2, 3)] = 2;
        data[(2, 0, 4)] = 1;
        let v = LabelVolume::fake(data, [0.5, 0.5, 2.0]);
        v.save(&path).unwrap();

        assert!(path.is_file());
        assert!(!super::partial_path(&path).exists());
        let back = LabelVolume::open(&path).unwrap();
        assert_eq!(back.shape(), (3, 4, 5));
        assert_eq!(back[(1, 2, 3)], 2);
        assert_eq!(back[(2, 0, 4)], 1);
        assert_eq!(back.foreground_count(), 2);
    }
}
