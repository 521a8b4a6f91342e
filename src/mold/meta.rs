// 该文件是 Xianwei （显微） 项目的一部分。
// src/mold/meta.rs - 图像元数据向量
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

//! 元数据向量布局（长度 `12 + num_classes`）：
//!
//! | 下标 | 含义 |
//! |---|---|
//! | 0 | 图像 id（仅调试用） |
//! | 1-3 | 原图形状 (H, W, C) |
//! | 4-6 | 塑形后形状 (H, W, C) |
//! | 7-10 | 窗口 (y1, x1, y2, x2) |
//! | 11 | 缩放系数 |
//! | 12.. | 各类别是否启用 |

use crate::{
  mold::{MoldingResult, Window},
  tensor::{ShapeError, Tensor},
};

pub const META_FIXED_LEN: usize = 12;

// f32 能精确表示的最大整数
const F32_EXACT_LIMIT: usize = 1 << 24;

/// 编码后的元数据向量，构造后不可变
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataVector {
  values: Box<[f32]>,
}

/// 从元数据向量解析出的固定字段
#[derive(Debug, Clone, PartialEq)]
pub struct ImageMeta {
  pub image_id: u32,
  pub original_shape: [usize; 3],
  pub molded_shape: [usize; 3],
  pub window: Window,
  pub scale: f32,
  pub active_class_ids: Vec<bool>,
}

fn exact(value: usize, field: &str) -> Result<f32, ShapeError> {
  if value > F32_EXACT_LIMIT {
    return Err(ShapeError::new(format!(
      "元数据字段 {} 的值 {} 超出 f32 可精确表示的范围",
      field, value
    )));
  }
  Ok(value as f32)
}

/// 由塑形结果、图像 id 与启用类别生成元数据向量
pub fn encode_metadata(
  image_id: u32,
  molding: &MoldingResult,
  active_class_ids: &[bool],
) -> Result<MetadataVector, ShapeError> {
  let mut values = Vec::with_capacity(META_FIXED_LEN + active_class_ids.len());

  values.push(exact(image_id as usize, "image_id")?);
  for dim in molding.original_shape {
    values.push(exact(dim, "original_shape")?);
  }
  for dim in molding.molded_shape {
    values.push(exact(dim, "molded_shape")?);
  }
  for coord in molding.window.as_array() {
    values.push(exact(coord, "window")?);
  }
  values.push(molding.scale);
  values.extend(
    active_class_ids
      .iter()
      .map(|active| if *active { 1.0 } else { 0.0 }),
  );

  Ok(MetadataVector {
    values: values.into_boxed_slice(),
  })
}

impl MetadataVector {
  pub fn as_slice(&self) -> &[f32] {
    &self.values
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  pub fn num_classes(&self) -> usize {
    self.values.len() - META_FIXED_LEN
  }

  /// 一维张量 `[12 + num_classes]`
  pub fn to_tensor(&self) -> Tensor<f32> {
    Tensor::from_array(ndarray::Array1::from(self.values.to_vec()))
  }

  pub fn parse(&self) -> Result<ImageMeta, ShapeError> {
    ImageMeta::parse(&self.values)
  }
}

impl ImageMeta {
  pub fn parse(values: &[f32]) -> Result<Self, ShapeError> {
    if values.len() < META_FIXED_LEN {
      return Err(ShapeError::new(format!(
        "元数据向量长度至少为 {}, 实际为 {}",
        META_FIXED_LEN,
        values.len()
      )));
    }
    let dim = |i: usize| values[i] as usize;
    Ok(ImageMeta {
      image_id: values[0] as u32,
      original_shape: [dim(1), dim(2), dim(3)],
      molded_shape: [dim(4), dim(5), dim(6)],
      window: Window {
        y1: dim(7),
        x1: dim(8),
        y2: dim(9),
        x2: dim(10),
      },
      scale: values[11],
      active_class_ids: values[META_FIXED_LEN..].iter().map(|v| *v != 0.0).collect(),
    })
  }
}
