//! 空间坐标系.

use nifti::NiftiHeader;

/// 判断两个空间坐标系是否一致时使用的默认绝对误差.
pub const FRAME_TOLERANCE: f64 = 1e-4;

/// 体积的空间坐标系 (原点, 体素间距, 方向), 全部取自 nifti header.
///
/// 方向信息同时保存 qform (四元数) 和 sform (仿射矩阵) 两种表示,
/// 比较时二者都参与.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SpatialFrame {
    /// 体素间距, 以毫米为单位, 按 nifti 惯例为 `[w, h, z]`.
    pub spacing: [f64; 3],

    /// qform 编码.
    pub qform_code: i16,

    /// sform 编码.
    pub sform_code: i16,

    /// 四元数的 b, c, d 分量.
    pub quatern: [f64; 3],

    /// qform 原点偏移.
    pub offset: [f64; 3],

    /// sform 仿射矩阵的前三行.
    pub srow: [[f64; 4]; 3],
}

impl SpatialFrame {
    /// 从 nifti header 中提取.
    pub fn from_header(h: &NiftiHeader) -> Self {
        #[inline]
        fn row(r: &[f32; 4]) -> [f64; 4] {
            r.map(f64::from)
        }

        let [_, pw, ph, pz, ..] = h.pixdim;
        Self {
            spacing: [pw as f64, ph as f64, pz as f64],
            qform_code: h.qform_code,
            sform_code: h.sform_code,
            quatern: [h.quatern_b as f64, h.quatern_c as f64, h.quatern_d as f64],
            offset: [h.quatern_x as f64, h.quatern_y as f64, h.quatern_z as f64],
            srow: [row(&h.srow_x), row(&h.srow_y), row(&h.srow_z)],
        }
    }

    /// 世界坐标原点. sform 有效时取其平移列, 否则取 qform 偏移.
    pub fn origin(&self) -> [f64; 3] {
        if self.sform_code > 0 {
            [self.srow[0][3], self.srow[1][3], self.srow[2][3]]
        } else {
            self.offset
        }
    }

    /// 在绝对误差 `tol` 内判断两个坐标系是否一致. 编码必须完全相同.
    pub fn approx_eq(&self, other: &Self, tol: f64) -> bool {
        #[inline]
        fn close(a: &[f64], b: &[f64], tol: f64) -> bool {
            a.iter().zip(b).all(|(x, y)| (x - y).abs() <= tol)
        }

        self.qform_code == other.qform_code
            && self.sform_code == other.sform_code
            && close(&self.spacing, &other.spacing, tol)
            && close(&self.quatern, &other.quatern, tol)
            && close(&self.offset, &other.offset, tol)
            && self
                .srow
                .iter()
                .zip(other.srow.iter())
                .all(|(a, b)| close(a, b, tol))
    }
}
