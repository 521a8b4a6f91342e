// 该文件是 Xianwei （显微） 项目的一部分。
// src/model.rs - 推理后端接口
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

use serde::Deserialize;
use thiserror::Error;

use crate::tensor::{AnyTensor, ConversionError, NamedTensors, ShapeError};

pub mod package;
pub use self::package::{AnchorSpec, ModelPackage};

#[cfg(feature = "onnx")]
pub mod onnx;
#[cfg(feature = "onnx")]
pub use self::onnx::{OnnxBackend, OnnxHandle};

/// 推理后端：根据模型包创建推理句柄
pub trait InferenceBackend {
  type Handle: InferenceHandle;

  fn load(&self, package: &ModelPackage) -> Result<Self::Handle, ModelLoadError>;
}

/// 已加载的模型
///
/// 同一时刻只由一个调用者持有，`run` 需要可变借用。
/// 返回的张量与 `outputs` 中的名称一一对应。
pub trait InferenceHandle {
  fn run(
    &mut self,
    inputs: &NamedTensors,
    outputs: &[String],
  ) -> Result<Vec<AnyTensor>, InferenceError>;
}

impl<H: InferenceHandle + ?Sized> InferenceHandle for Box<H> {
  fn run(
    &mut self,
    inputs: &NamedTensors,
    outputs: &[String],
  ) -> Result<Vec<AnyTensor>, InferenceError> {
    (**self).run(inputs, outputs)
  }
}

#[derive(Error, Debug)]
pub enum ModelLoadError {
  #[error("不支持的模型位置: {0}")]
  UnsupportedLocation(String),
  #[error("读取模型文件 {path} 失败: {source}")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[error("模型配置 {path} 格式错误: {source}")]
  MalformedConfig {
    path: String,
    #[source]
    source: serde_json::Error,
  },
  #[error("模型配置 {path} 格式错误: {source}")]
  MalformedYaml {
    path: String,
    #[source]
    source: serde_yaml::Error,
  },
  #[error("模型压缩包 {path} 无法读取: {source}")]
  Archive {
    path: String,
    #[source]
    source: zip::result::ZipError,
  },
  #[error("模型配置缺少必要内容: {0}")]
  MissingConfig(String),
  #[error("模型配置无效: {0}")]
  InvalidConfig(String),
  #[error("推理后端加载失败: {0}")]
  Backend(String),
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("缺少输入节点: {0}")]
  MissingInput(String),
  #[error("缺少输出节点: {0}")]
  MissingOutput(String),
  #[error("输入节点 {name} 形状错误: 期望 {expected}, 实际 {actual:?}")]
  InputShape {
    name: String,
    expected: String,
    actual: Vec<usize>,
  },
  #[error("张量类型转换失败: {0}")]
  Conversion(#[from] ConversionError),
  #[error("{0}")]
  Shape(#[from] ShapeError),
  #[error("推理后端错误: {0}")]
  Backend(String),
}

/// 模型输入节点名称
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct InputNodes {
  pub image: String,
  pub image_meta: String,
  pub anchors: String,
}

impl Default for InputNodes {
  fn default() -> Self {
    InputNodes {
      image: "input_image".to_string(),
      image_meta: "input_image_meta".to_string(),
      anchors: "input_anchors".to_string(),
    }
  }
}

/// 模型输出节点名称
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OutputNodes {
  pub detections: String,
  pub mask: String,
}

impl Default for OutputNodes {
  fn default() -> Self {
    OutputNodes {
      detections: "detections".to_string(),
      mask: "mrcnn_mask".to_string(),
    }
  }
}

impl OutputNodes {
  /// 解码所需的输出，顺序固定为 detections 在前
  pub fn requested(&self, want_masks: bool) -> Vec<String> {
    if want_masks {
      vec![self.detections.clone(), self.mask.clone()]
    } else {
      vec![self.detections.clone()]
    }
  }
}

/// 输入节点的期望形状，`None` 表示该维不限
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSignature {
  pub name: String,
  pub shape: Vec<Option<usize>>,
}

impl InputSignature {
  pub fn new(name: impl Into<String>, shape: Vec<Option<usize>>) -> Self {
    InputSignature {
      name: name.into(),
      shape,
    }
  }

  pub fn matches(&self, shape: &[usize]) -> bool {
    self.shape.len() == shape.len()
      && self
        .shape
        .iter()
        .zip(shape)
        .all(|(expected, actual)| expected.is_none_or(|e| e == *actual))
  }

  fn describe(&self) -> String {
    let dims: Vec<String> = self
      .shape
      .iter()
      .map(|d| d.map_or_else(|| "?".to_string(), |d| d.to_string()))
      .collect();
    format!("[{}]", dims.join(", "))
  }

  /// 检查输入表中对应节点存在且形状相符
  pub fn check(&self, inputs: &NamedTensors) -> Result<(), InferenceError> {
    let tensor = inputs
      .get(&self.name)
      .ok_or_else(|| InferenceError::MissingInput(self.name.clone()))?;
    if !self.matches(tensor.shape()) {
      return Err(InferenceError::InputShape {
        name: self.name.clone(),
        expected: self.describe(),
        actual: tensor.shape().to_vec(),
      });
    }
    Ok(())
  }
}
