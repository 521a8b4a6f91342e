// 该文件是 Xianwei （显微） 项目的一部分。
// src/mold.rs - 图像塑形（缩放、填充、归一化）
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

use ndarray::{Array3, Axis, Ix3, s};
use tracing::debug;

use crate::{
  frame::{ImageBuffer, broadcast_rgb},
  tensor::ShapeError,
};

pub mod meta;
pub mod resize;

pub use self::meta::{ImageMeta, MetadataVector, encode_metadata};
pub use self::resize::{resize_bilinear, resize_bilinear_2d};

const RGB_CHANNELS: usize = 3;
const INTENSITY_MAX: f32 = 255.0;

/// 塑形参数，来自模型包配置
#[derive(Debug, Clone, PartialEq)]
pub struct MoldConfig {
  /// 最短边下限，`None` 表示不约束
  pub min_dimension: Option<u32>,
  /// 最长边上限，同时也是填充后的画布边长
  pub max_dimension: Option<u32>,
  pub min_scale: f32,
  pub pad: bool,
  pub mean_pixel: [f32; 3],
  /// 减均值前先把强度线性拉伸到 [0, 255]
  pub rescale_intensity: bool,
}

impl Default for MoldConfig {
  fn default() -> Self {
    MoldConfig {
      min_dimension: Some(10),
      max_dimension: Some(512),
      min_scale: 1.0,
      pad: true,
      mean_pixel: [123.7, 116.8, 103.9],
      rescale_intensity: false,
    }
  }
}

/// 画布中真实图像所在的矩形，(y1, x1, y2, x2)，右下为开区间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
  pub y1: usize,
  pub x1: usize,
  pub y2: usize,
  pub x2: usize,
}

impl Window {
  pub fn height(&self) -> usize {
    self.y2 - self.y1
  }

  pub fn width(&self) -> usize {
    self.x2 - self.x1
  }

  pub fn as_array(&self) -> [usize; 4] {
    [self.y1, self.x1, self.y2, self.x2]
  }
}

/// 单帧塑形结果，保存逆变换所需的全部信息
#[derive(Debug, Clone, PartialEq)]
pub struct MoldingResult {
  pub image: ImageBuffer,
  pub original_shape: [usize; 3],
  pub molded_shape: [usize; 3],
  pub window: Window,
  pub scale: f32,
}

impl MoldingResult {
  /// 画布坐标映射回原图坐标
  pub fn to_original(&self, y: f32, x: f32) -> (f32, f32) {
    (
      (y - self.window.y1 as f32) / self.scale,
      (x - self.window.x1 as f32) / self.scale,
    )
  }
}

/// 计算缩放系数
pub fn compute_scale(height: usize, width: usize, config: &MoldConfig) -> f32 {
  let mut scale = 1.0f32;

  if let Some(min_dim) = config.min_dimension {
    scale = (min_dim as f32 / height.min(width) as f32).max(1.0);
  }

  if scale < config.min_scale {
    scale = config.min_scale;
  }

  if let Some(max_dim) = config.max_dimension {
    let image_max = height.max(width) as f32;
    if (image_max * scale).round() > max_dim as f32 {
      scale = max_dim as f32 / image_max;
    }
  }

  scale
}

fn rescale_intensity(image: &mut Array3<f32>) {
  let (min, max) = image
    .iter()
    .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
      (lo.min(*v), hi.max(*v))
    });
  if max <= min {
    image.fill(0.0);
    return;
  }
  let factor = INTENSITY_MAX / (max - min);
  image.mapv_inplace(|v| (v - min) * factor);
}

/// 将一帧（模型轴顺序）塑形为模型输入
pub fn mold_image(frame: &ImageBuffer, config: &MoldConfig) -> Result<MoldingResult, ShapeError> {
  if config.pad && config.max_dimension.is_none() {
    return Err(ShapeError::new("填充需要设置最大边长"));
  }

  let rgb = broadcast_rgb(frame)?;
  let mut image = rgb.into_data().into_dimensionality::<Ix3>()?;
  let (height, width, _) = image.dim();
  let original_shape = [height, width, RGB_CHANNELS];

  if config.rescale_intensity {
    rescale_intensity(&mut image);
  }

  for (c, mean) in config.mean_pixel.iter().enumerate() {
    image
      .index_axis_mut(Axis(2), c)
      .mapv_inplace(|v| v - mean);
  }

  let scale = compute_scale(height, width, config);
  if scale != 1.0 {
    let new_h = ((height as f32 * scale).round() as usize).max(1);
    let new_w = ((width as f32 * scale).round() as usize).max(1);
    debug!("缩放图像 {}x{} -> {}x{} (scale={})", height, width, new_h, new_w, scale);
    image = resize_bilinear(image.view(), new_h, new_w);
  }

  let (h, w, _) = image.dim();
  let (image, window) = match (config.pad, config.max_dimension) {
    (true, Some(max_dim)) => {
      let max_dim = max_dim as usize;
      if h > max_dim || w > max_dim {
        return Err(ShapeError::new(format!(
          "缩放后尺寸 {}x{} 超过画布边长 {}",
          h, w, max_dim
        )));
      }
      let top_pad = (max_dim - h) / 2;
      let left_pad = (max_dim - w) / 2;
      let mut canvas = Array3::zeros((max_dim, max_dim, RGB_CHANNELS));
      canvas
        .slice_mut(s![top_pad..top_pad + h, left_pad..left_pad + w, ..])
        .assign(&image);
      let window = Window {
        y1: top_pad,
        x1: left_pad,
        y2: h + top_pad,
        x2: w + left_pad,
      };
      (canvas, window)
    }
    _ => (
      image,
      Window {
        y1: 0,
        x1: 0,
        y2: h,
        x2: w,
      },
    ),
  };

  let molded_shape = {
    let (mh, mw, mc) = image.dim();
    [mh, mw, mc]
  };

  Ok(MoldingResult {
    image: ImageBuffer::from_yxc(image),
    original_shape,
    molded_shape,
    window,
    scale,
  })
}
