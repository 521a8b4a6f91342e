// 该文件是 Xianwei （显微） 项目的一部分。
// src/tensor.rs - 数值张量
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

use std::collections::BTreeMap;

use ndarray::{Array, ArrayD, ArrayViewD, Axis, Dimension, IxDyn};
use thiserror::Error;

/// 数组或张量的维数、长度不匹配
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("形状错误: {message}")]
pub struct ShapeError {
  message: String,
}

impl ShapeError {
  pub fn new(message: impl Into<String>) -> Self {
    ShapeError {
      message: message.into(),
    }
  }

  pub fn message(&self) -> &str {
    &self.message
  }
}

impl From<ndarray::ShapeError> for ShapeError {
  fn from(err: ndarray::ShapeError) -> Self {
    ShapeError::new(err.to_string())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
  F32,
  F64,
  I32,
  I64,
  U8,
}

impl std::fmt::Display for DType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      DType::F32 => "f32",
      DType::F64 => "f64",
      DType::I32 => "i32",
      DType::I64 => "i64",
      DType::U8 => "u8",
    };
    f.write_str(name)
  }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversionError {
  #[error("无法将 {from} 值 {value} 转换为 {to}")]
  OutOfRange { from: DType, to: DType, value: f64 },
  #[error("将 {from} 值 {value} 转换为 {to} 会丢失精度")]
  Inexact { from: DType, to: DType, value: f64 },
}

/// 张量元素类型
///
/// 所有转换都先经过 `f64`，再由目标类型检查取值范围。
pub trait Element: Copy + Default + std::fmt::Debug + Send + Sync + 'static {
  const DTYPE: DType;
  const IS_FLOAT: bool;

  fn to_f64(self) -> f64;
  fn from_f64_checked(value: f64) -> Option<Self>;
}

impl Element for f32 {
  const DTYPE: DType = DType::F32;
  const IS_FLOAT: bool = true;

  fn to_f64(self) -> f64 {
    self as f64
  }

  fn from_f64_checked(value: f64) -> Option<Self> {
    if value.is_finite() && value.abs() > f32::MAX as f64 {
      None
    } else {
      Some(value as f32)
    }
  }
}

impl Element for f64 {
  const DTYPE: DType = DType::F64;
  const IS_FLOAT: bool = true;

  fn to_f64(self) -> f64 {
    self
  }

  fn from_f64_checked(value: f64) -> Option<Self> {
    Some(value)
  }
}

macro_rules! integer_element {
  ($ty:ty, $dtype:expr) => {
    impl Element for $ty {
      const DTYPE: DType = $dtype;
      const IS_FLOAT: bool = false;

      fn to_f64(self) -> f64 {
        self as f64
      }

      fn from_f64_checked(value: f64) -> Option<Self> {
        if value.is_finite()
          && value.fract() == 0.0
          && value >= <$ty>::MIN as f64
          && value <= <$ty>::MAX as f64
        {
          Some(value as $ty)
        } else {
          None
        }
      }
    }
  };
}

integer_element!(i32, DType::I32);
integer_element!(i64, DType::I64);
integer_element!(u8, DType::U8);

/// 以元素类型参数化的张量
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T> {
  data: ArrayD<T>,
}

impl<T: Element> Tensor<T> {
  pub fn from_shape_vec(shape: &[usize], data: Vec<T>) -> Result<Self, ShapeError> {
    let expected: usize = shape.iter().product();
    if expected != data.len() {
      return Err(ShapeError::new(format!(
        "形状 {:?} 需要 {} 个元素, 实际为 {}",
        shape,
        expected,
        data.len()
      )));
    }
    let data = ArrayD::from_shape_vec(IxDyn(shape), data)?;
    Ok(Tensor { data })
  }

  pub fn from_array<D: Dimension>(array: Array<T, D>) -> Self {
    Tensor {
      data: array.into_dyn(),
    }
  }

  pub fn dtype(&self) -> DType {
    T::DTYPE
  }

  pub fn shape(&self) -> &[usize] {
    self.data.shape()
  }

  pub fn ndim(&self) -> usize {
    self.data.ndim()
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn view(&self) -> ArrayViewD<'_, T> {
    self.data.view()
  }

  /// 连续存储时返回底层切片
  pub fn as_slice(&self) -> Option<&[T]> {
    self.data.as_slice()
  }

  pub fn into_array(self) -> ArrayD<T> {
    self.data
  }

  /// 按逻辑（行优先）顺序复制出全部元素
  pub fn to_vec(&self) -> Vec<T> {
    self.data.iter().copied().collect()
  }

  /// 在第 0 轴插入批次维
  pub fn insert_batch_axis(self) -> Self {
    Tensor {
      data: self.data.insert_axis(Axis(0)),
    }
  }

  /// 若第 0 轴为大小 1 的批次维则去掉它
  pub fn squeeze_batch_axis(self) -> Self {
    if self.data.ndim() > 1 && self.data.shape()[0] == 1 {
      Tensor {
        data: self.data.index_axis_move(Axis(0), 0),
      }
    } else {
      self
    }
  }

  /// 带检查的元素类型转换
  ///
  /// 整数转浮点时要求数值可被精确表示（f32 为 2^24 以内）。
  pub fn cast<U: Element>(&self) -> Result<Tensor<U>, ConversionError> {
    for value in self.data.iter() {
      let wide = value.to_f64();
      let converted = U::from_f64_checked(wide).ok_or(ConversionError::OutOfRange {
        from: T::DTYPE,
        to: U::DTYPE,
        value: wide,
      })?;
      if !T::IS_FLOAT && converted.to_f64() != wide {
        return Err(ConversionError::Inexact {
          from: T::DTYPE,
          to: U::DTYPE,
          value: wide,
        });
      }
    }
    // 上面已逐个检查过
    let data = self
      .data
      .mapv(|value| U::from_f64_checked(value.to_f64()).unwrap_or_default());
    Ok(Tensor { data })
  }
}

/// 后端边界上的类型擦除张量
#[derive(Debug, Clone, PartialEq)]
pub enum AnyTensor {
  F32(Tensor<f32>),
  F64(Tensor<f64>),
  I32(Tensor<i32>),
  I64(Tensor<i64>),
  U8(Tensor<u8>),
}

macro_rules! any_tensor_from {
  ($ty:ty, $variant:ident) => {
    impl From<Tensor<$ty>> for AnyTensor {
      fn from(tensor: Tensor<$ty>) -> Self {
        AnyTensor::$variant(tensor)
      }
    }
  };
}

any_tensor_from!(f32, F32);
any_tensor_from!(f64, F64);
any_tensor_from!(i32, I32);
any_tensor_from!(i64, I64);
any_tensor_from!(u8, U8);

impl AnyTensor {
  pub fn dtype(&self) -> DType {
    match self {
      AnyTensor::F32(_) => DType::F32,
      AnyTensor::F64(_) => DType::F64,
      AnyTensor::I32(_) => DType::I32,
      AnyTensor::I64(_) => DType::I64,
      AnyTensor::U8(_) => DType::U8,
    }
  }

  pub fn shape(&self) -> &[usize] {
    match self {
      AnyTensor::F32(t) => t.shape(),
      AnyTensor::F64(t) => t.shape(),
      AnyTensor::I32(t) => t.shape(),
      AnyTensor::I64(t) => t.shape(),
      AnyTensor::U8(t) => t.shape(),
    }
  }

  pub fn to_typed<U: Element>(&self) -> Result<Tensor<U>, ConversionError> {
    match self {
      AnyTensor::F32(t) => t.cast(),
      AnyTensor::F64(t) => t.cast(),
      AnyTensor::I32(t) => t.cast(),
      AnyTensor::I64(t) => t.cast(),
      AnyTensor::U8(t) => t.cast(),
    }
  }

  pub fn to_f32(&self) -> Result<Tensor<f32>, ConversionError> {
    match self {
      AnyTensor::F32(t) => Ok(t.clone()),
      other => other.to_typed(),
    }
  }
}

/// 以节点名称为键的输入/输出张量表
pub type NamedTensors = BTreeMap<String, AnyTensor>;
