// 该文件是 Xianwei （显微） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理后端
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

use std::borrow::Cow;

use ort::{
  session::{Session, SessionInputValue, SessionInputs},
  value::TensorRef,
};
use tracing::{debug, info};

use crate::{
  model::{InferenceBackend, InferenceError, InferenceHandle, ModelLoadError, ModelPackage},
  tensor::{AnyTensor, NamedTensors, Tensor},
};

/// 以 ONNX Runtime 执行模型包中的计算图
#[derive(Debug, Default, Clone)]
pub struct OnnxBackend {
  intra_threads: Option<usize>,
}

impl OnnxBackend {
  pub fn intra_threads(mut self, threads: usize) -> Self {
    self.intra_threads = Some(threads);
    self
  }
}

pub struct OnnxHandle {
  session: Session,
  name: String,
}

impl Drop for OnnxHandle {
  fn drop(&mut self) {
    debug!("释放 ONNX 会话: {}", self.name);
  }
}

fn backend_error(e: ort::Error) -> ModelLoadError {
  ModelLoadError::Backend(e.to_string())
}

impl InferenceBackend for OnnxBackend {
  type Handle = OnnxHandle;

  fn load(&self, package: &ModelPackage) -> Result<Self::Handle, ModelLoadError> {
    let path = package.graph_path();
    info!("创建 ONNX 推理会话: {}", path.display());
    if !path.is_file() {
      return Err(ModelLoadError::Io {
        path: path.display().to_string(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "计算图文件不存在"),
      });
    }

    let mut builder = Session::builder().map_err(backend_error)?;
    if let Some(threads) = self.intra_threads {
      builder = builder
        .with_intra_threads(threads)
        .map_err(backend_error)?;
    }
    let session = builder.commit_from_file(path).map_err(backend_error)?;

    for input in session.inputs.iter() {
      debug!("模型输入节点: {}", input.name);
    }
    for output in session.outputs.iter() {
      debug!("模型输出节点: {}", output.name);
    }

    Ok(OnnxHandle {
      session,
      name: package.name().to_string(),
    })
  }
}

fn tensor_ref<'a>(
  name: &str,
  tensor: &'a Tensor<f32>,
) -> Result<TensorRef<'a, f32>, InferenceError> {
  let dims: Vec<i64> = tensor.shape().iter().map(|&d| d as i64).collect();
  let data = tensor
    .as_slice()
    .ok_or_else(|| InferenceError::Backend(format!("输入 {} 的存储不连续", name)))?;
  TensorRef::from_array_view((dims, data))
    .map_err(|e| InferenceError::Backend(format!("创建输入 {} 失败: {}", name, e)))
}

impl InferenceHandle for OnnxHandle {
  fn run(
    &mut self,
    inputs: &NamedTensors,
    outputs: &[String],
  ) -> Result<Vec<AnyTensor>, InferenceError> {
    for declared in self.session.inputs.iter() {
      if !inputs.contains_key(&declared.name) {
        return Err(InferenceError::MissingInput(declared.name.clone()));
      }
    }

    // 后端统一以 f32 接收
    let converted: Vec<(&str, Tensor<f32>)> = inputs
      .iter()
      .map(|(name, tensor)| Ok((name.as_str(), tensor.to_f32()?)))
      .collect::<Result<_, InferenceError>>()?;

    let mut values: Vec<(Cow<'_, str>, SessionInputValue<'_>)> = Vec::with_capacity(converted.len());
    for (name, tensor) in converted.iter() {
      values.push((Cow::Borrowed(*name), tensor_ref(name, tensor)?.into()));
    }

    let ort_inputs: SessionInputs<'_, '_, 0> = SessionInputs::ValueMap(values);
    let session_outputs = self
      .session
      .run(ort_inputs)
      .map_err(|e| InferenceError::Backend(e.to_string()))?;

    let mut results = Vec::with_capacity(outputs.len());
    for name in outputs {
      let value = session_outputs
        .get(name.as_str())
        .ok_or_else(|| InferenceError::MissingOutput(name.clone()))?;
      let tensor = if let Ok((shape, data)) = value.try_extract_tensor::<f32>() {
        let shape: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        AnyTensor::from(Tensor::from_shape_vec(&shape, data.to_vec())?)
      } else if let Ok((shape, data)) = value.try_extract_tensor::<i64>() {
        let shape: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        AnyTensor::from(Tensor::from_shape_vec(&shape, data.to_vec())?)
      } else if let Ok((shape, data)) = value.try_extract_tensor::<i32>() {
        let shape: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        AnyTensor::from(Tensor::from_shape_vec(&shape, data.to_vec())?)
      } else {
        return Err(InferenceError::Backend(format!(
          "输出 {} 的元素类型不受支持, 仅支持 f32/i64/i32",
          name
        )));
      };
      debug!("输出 {} 形状 {:?}", name, tensor.shape());
      results.push(tensor);
    }

    Ok(results)
  }
}
