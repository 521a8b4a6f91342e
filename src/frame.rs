// 该文件是 Xianwei （显微） 项目的一部分。
// src/frame.rs - 图像缓冲区与轴顺序转换
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

use ndarray::{Array2, Array3, ArrayD, ArrayViewD, Ix2};
use thiserror::Error;

use crate::tensor::ShapeError;

const RGB_CHANNELS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
  Row,
  Column,
  Channel,
  Frame,
}

/// 模型张量使用的轴顺序：行、列、通道
pub const MODEL_ORDER: [Axis; 4] = [Axis::Row, Axis::Column, Axis::Channel, Axis::Frame];

/// 图像库原生的轴顺序：列（X）、行（Y）、通道
pub const NATIVE_ORDER: [Axis; 4] = [Axis::Column, Axis::Row, Axis::Channel, Axis::Frame];

/// 带轴标签的浮点多维数组
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBuffer {
  data: ArrayD<f32>,
  axes: Vec<Axis>,
}

impl ImageBuffer {
  pub fn new(data: ArrayD<f32>, axes: Vec<Axis>) -> Result<Self, ShapeError> {
    if data.ndim() != axes.len() {
      return Err(ShapeError::new(format!(
        "数组有 {} 个维度, 但给出了 {} 个轴标签",
        data.ndim(),
        axes.len()
      )));
    }
    for (i, axis) in axes.iter().enumerate() {
      if axes[..i].contains(axis) {
        return Err(ShapeError::new(format!("轴 {:?} 重复出现", axis)));
      }
    }
    Ok(ImageBuffer { data, axes })
  }

  /// 行优先的单通道图像
  pub fn from_yx(data: Array2<f32>) -> Self {
    ImageBuffer {
      data: data.into_dyn(),
      axes: vec![Axis::Row, Axis::Column],
    }
  }

  /// 行优先的多通道图像
  pub fn from_yxc(data: Array3<f32>) -> Self {
    ImageBuffer {
      data: data.into_dyn(),
      axes: vec![Axis::Row, Axis::Column, Axis::Channel],
    }
  }

  pub fn axes(&self) -> &[Axis] {
    &self.axes
  }

  pub fn shape(&self) -> &[usize] {
    self.data.shape()
  }

  pub fn ndim(&self) -> usize {
    self.data.ndim()
  }

  pub fn view(&self) -> ArrayViewD<'_, f32> {
    self.data.view()
  }

  pub fn into_data(self) -> ArrayD<f32> {
    self.data
  }

  pub fn axis_len(&self, axis: Axis) -> Option<usize> {
    self
      .axes
      .iter()
      .position(|a| *a == axis)
      .map(|i| self.data.shape()[i])
  }

  pub fn height(&self) -> Option<usize> {
    self.axis_len(Axis::Row)
  }

  pub fn width(&self) -> Option<usize> {
    self.axis_len(Axis::Column)
  }

  pub fn channels(&self) -> usize {
    self.axis_len(Axis::Channel).unwrap_or(1)
  }

  /// 按给定轴顺序重排，返回新的连续存储缓冲区
  pub fn permuted(&self, order: &[Axis]) -> Result<Self, ShapeError> {
    if order.len() != self.axes.len() {
      return Err(ShapeError::new(format!(
        "目标轴顺序 {:?} 与缓冲区轴 {:?} 不匹配",
        order, self.axes
      )));
    }
    let mut permutation = Vec::with_capacity(order.len());
    for axis in order {
      let index = self
        .axes
        .iter()
        .position(|a| a == axis)
        .ok_or_else(|| ShapeError::new(format!("缓冲区缺少轴 {:?}", axis)))?;
      permutation.push(index);
    }
    let data = self
      .data
      .view()
      .permuted_axes(permutation.as_slice())
      .as_standard_layout()
      .into_owned();
    Ok(ImageBuffer {
      data,
      axes: order.to_vec(),
    })
  }
}

fn reorder(buffer: &ImageBuffer, canonical: &[Axis]) -> Result<ImageBuffer, ShapeError> {
  if buffer.ndim() != 2 && buffer.ndim() != 3 {
    return Err(ShapeError::new(format!(
      "图像只能有 2 或 3 个维度, 实际为 {}",
      buffer.ndim()
    )));
  }
  let order: Vec<Axis> = canonical
    .iter()
    .copied()
    .filter(|axis| buffer.axes.contains(axis))
    .collect();
  buffer.permuted(&order)
}

/// 原生顺序转为模型顺序（仅做轴置换，不改变数值）
pub fn to_model_order(buffer: &ImageBuffer) -> Result<ImageBuffer, ShapeError> {
  reorder(buffer, &MODEL_ORDER)
}

/// 模型顺序转回原生顺序
pub fn from_model_order(buffer: &ImageBuffer) -> Result<ImageBuffer, ShapeError> {
  reorder(buffer, &NATIVE_ORDER)
}

/// 灰度图复制为三通道，输入需为模型顺序
pub fn broadcast_rgb(buffer: &ImageBuffer) -> Result<ImageBuffer, ShapeError> {
  let gray: Array2<f32> = match (buffer.axes(), buffer.shape()) {
    ([Axis::Row, Axis::Column], _) => buffer
      .data
      .view()
      .into_dimensionality::<Ix2>()?
      .to_owned(),
    ([Axis::Row, Axis::Column, Axis::Channel], [_, _, RGB_CHANNELS]) => return Ok(buffer.clone()),
    ([Axis::Row, Axis::Column, Axis::Channel], [_, _, 1]) => buffer
      .data
      .view()
      .index_axis_move(ndarray::Axis(2), 0)
      .into_dimensionality::<Ix2>()?
      .to_owned(),
    (axes, shape) => {
      return Err(ShapeError::new(format!(
        "无法将轴为 {:?}、形状为 {:?} 的缓冲区转换为 RGB",
        axes, shape
      )));
    }
  };
  let rgb = ndarray::stack(
    ndarray::Axis(2),
    &[gray.view(), gray.view(), gray.view()],
  )?;
  Ok(ImageBuffer::from_yxc(rgb))
}

/// 调用方提供的图像不可处理
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputValidationError {
  #[error("图像栈为空")]
  EmptyStack,
  #[error("第 {frame} 帧的维度不受支持: 轴 {axes:?}, 形状 {shape:?}")]
  UnsupportedDimensions {
    frame: usize,
    axes: Vec<Axis>,
    shape: Vec<usize>,
  },
  #[error("第 {frame} 帧尺寸 {height}x{width} 与第 0 帧 {expected_height}x{expected_width} 不一致")]
  InconsistentFrames {
    frame: usize,
    height: usize,
    width: usize,
    expected_height: usize,
    expected_width: usize,
  },
  #[error("第 {frame} 帧的{side}为 {size} 像素, 不能超过 {max} 像素")]
  TooLarge {
    frame: usize,
    side: &'static str,
    size: usize,
    max: u32,
  },
}

/// 由若干二维帧组成的图像栈
#[derive(Debug, Clone, PartialEq)]
pub struct ImageStack {
  frames: Vec<ImageBuffer>,
}

impl ImageStack {
  pub fn from_frames(frames: Vec<ImageBuffer>) -> Self {
    ImageStack { frames }
  }

  /// 若缓冲区带帧轴则沿帧轴切开，否则视为单帧
  pub fn from_buffer(buffer: ImageBuffer) -> Self {
    let Some(frame_axis) = buffer.axes.iter().position(|a| *a == Axis::Frame) else {
      return ImageStack {
        frames: vec![buffer],
      };
    };
    let axes: Vec<Axis> = buffer
      .axes
      .iter()
      .copied()
      .filter(|a| *a != Axis::Frame)
      .collect();
    let frames = buffer
      .data
      .axis_iter(ndarray::Axis(frame_axis))
      .map(|slice| ImageBuffer {
        data: slice.to_owned(),
        axes: axes.clone(),
      })
      .collect();
    ImageStack { frames }
  }

  pub fn len(&self) -> usize {
    self.frames.len()
  }

  pub fn is_empty(&self) -> bool {
    self.frames.is_empty()
  }

  pub fn frames(&self) -> &[ImageBuffer] {
    &self.frames
  }

  pub fn frame(&self, index: usize) -> Option<&ImageBuffer> {
    self.frames.get(index)
  }

  /// 处理开始前检查整个图像栈
  pub fn validate(&self, max_dimension: Option<u32>) -> Result<(), InputValidationError> {
    let Some(first) = self.frames.first() else {
      return Err(InputValidationError::EmptyStack);
    };
    let (expected_height, expected_width) = frame_size(0, first)?;

    for (index, frame) in self.frames.iter().enumerate() {
      let (height, width) = frame_size(index, frame)?;
      if (height, width) != (expected_height, expected_width) {
        return Err(InputValidationError::InconsistentFrames {
          frame: index,
          height,
          width,
          expected_height,
          expected_width,
        });
      }
      if let Some(max) = max_dimension {
        if width > max as usize {
          return Err(InputValidationError::TooLarge {
            frame: index,
            side: "宽度",
            size: width,
            max,
          });
        }
        if height > max as usize {
          return Err(InputValidationError::TooLarge {
            frame: index,
            side: "高度",
            size: height,
            max,
          });
        }
      }
    }
    Ok(())
  }
}

fn frame_size(index: usize, frame: &ImageBuffer) -> Result<(usize, usize), InputValidationError> {
  let unsupported = || InputValidationError::UnsupportedDimensions {
    frame: index,
    axes: frame.axes().to_vec(),
    shape: frame.shape().to_vec(),
  };
  let spatial_only = frame
    .axes()
    .iter()
    .all(|axis| matches!(axis, Axis::Row | Axis::Column | Axis::Channel));
  let supported_channels = matches!(frame.axis_len(Axis::Channel), None | Some(1) | Some(3));
  if !(frame.ndim() == 2 || frame.ndim() == 3) || !spatial_only || !supported_channels {
    return Err(unsupported());
  }
  match (frame.height(), frame.width()) {
    (Some(h), Some(w)) if h > 0 && w > 0 => Ok((h, w)),
    _ => Err(unsupported()),
  }
}
