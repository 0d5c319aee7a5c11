// ==========================================
// 价目表归一化管道 - 置信度值对象
// ==========================================
// 内部表示: 整数千分点 (0..=1000)
// 展示格式: 3 位小数 ("0.850")，仅在边界转换
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

/// 置信度（千分点，0..=1000）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Confidence(u16);

impl Confidence {
    pub const ZERO: Confidence = Confidence(0);
    pub const MAX: Confidence = Confidence(1000);

    /// 由千分点构造，超出范围时截断到 [0, 1000]
    pub fn from_points(points: i32) -> Self {
        Confidence(points.clamp(0, 1000) as u16)
    }

    /// 由浮点构造（四舍五入到 3 位小数），NaN 视为 0
    pub fn from_f64(value: f64) -> Self {
        if !value.is_finite() {
            return Confidence::ZERO;
        }
        Self::from_points((value * 1000.0).round() as i32)
    }

    pub fn points(&self) -> u16 {
        self.0
    }

    pub fn as_f64(&self) -> f64 {
        f64::from(self.0) / 1000.0
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}", self.0 / 1000, self.0 % 1000)
    }
}
