// 该文件是 Xianwei （显微） 项目的一部分。
// tests/common/mod.rs - 测试用推理后端
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

#![allow(dead_code)]

use std::sync::{
  Arc, Mutex,
  atomic::{AtomicUsize, Ordering},
};

use ndarray::Array2;
use xianwei::{
  frame::{ImageBuffer, ImageStack},
  model::{InferenceBackend, InferenceError, InferenceHandle, ModelLoadError, ModelPackage},
  tensor::{AnyTensor, NamedTensors, Tensor},
};

pub const SLOTS: usize = 4;
pub const MASK_SIZE: usize = 4;
pub const CANVAS: usize = 64;

/// 每帧的预设输出
#[derive(Debug, Clone)]
pub enum FrameScript {
  /// 每个检测为 (y1, x1, y2, x2, class_id, score)，坐标为画布像素
  Detections(Vec<[f32; 6]>),
  /// 推理失败
  Fail,
  /// 返回列数错误的 detections
  Malformed,
}

#[derive(Debug, Default)]
pub struct Counters {
  pub loaded: AtomicUsize,
  pub released: AtomicUsize,
  pub meta_ids: Mutex<Vec<f32>>,
  pub input_names: Mutex<Vec<Vec<String>>>,
}

pub struct ScriptedBackend {
  pub script: Vec<FrameScript>,
  pub counters: Arc<Counters>,
  pub fail_load: bool,
}

impl ScriptedBackend {
  pub fn new(script: Vec<FrameScript>) -> Self {
    ScriptedBackend {
      script,
      counters: Arc::new(Counters::default()),
      fail_load: false,
    }
  }
}

pub struct ScriptedHandle {
  script: Vec<FrameScript>,
  next: usize,
  num_classes: usize,
  meta_name: String,
  counters: Arc<Counters>,
}

impl Drop for ScriptedHandle {
  fn drop(&mut self) {
    self.counters.released.fetch_add(1, Ordering::SeqCst);
  }
}

impl InferenceBackend for ScriptedBackend {
  type Handle = ScriptedHandle;

  fn load(&self, package: &ModelPackage) -> Result<Self::Handle, ModelLoadError> {
    if self.fail_load {
      return Err(ModelLoadError::Backend("scripted failure".to_string()));
    }
    self.counters.loaded.fetch_add(1, Ordering::SeqCst);
    Ok(ScriptedHandle {
      script: self.script.clone(),
      next: 0,
      num_classes: package.num_classes(),
      meta_name: package.input_nodes().image_meta.clone(),
      counters: self.counters.clone(),
    })
  }
}

impl InferenceHandle for ScriptedHandle {
  fn run(
    &mut self,
    inputs: &NamedTensors,
    outputs: &[String],
  ) -> Result<Vec<AnyTensor>, InferenceError> {
    self
      .counters
      .input_names
      .lock()
      .unwrap()
      .push(inputs.keys().cloned().collect());
    let meta = inputs
      .get(&self.meta_name)
      .ok_or_else(|| InferenceError::MissingInput(self.meta_name.clone()))?
      .to_f32()?;
    self.counters.meta_ids.lock().unwrap().push(meta.to_vec()[0]);

    let script = self.script.get(self.next).cloned().unwrap_or(FrameScript::Detections(vec![]));
    self.next += 1;

    let rows = match script {
      FrameScript::Fail => return Err(InferenceError::Backend("scripted failure".to_string())),
      FrameScript::Malformed => {
        let bad = Tensor::<f32>::from_shape_vec(&[1, SLOTS, 5], vec![0.0; SLOTS * 5])?;
        return Ok(outputs.iter().map(|_| AnyTensor::from(bad.clone())).collect());
      }
      FrameScript::Detections(rows) => rows,
    };

    let mut detections = vec![0.0f32; SLOTS * 6];
    for (i, row) in rows.iter().enumerate().take(SLOTS) {
      let canvas = CANVAS as f32;
      let normalized = [
        row[0] / canvas,
        row[1] / canvas,
        row[2] / canvas,
        row[3] / canvas,
        row[4],
        row[5],
      ];
      detections[i * 6..(i + 1) * 6].copy_from_slice(&normalized);
    }

    let mut results = Vec::with_capacity(outputs.len());
    for name in outputs {
      match name.as_str() {
        "detections" => results.push(AnyTensor::from(Tensor::from_shape_vec(
          &[1, SLOTS, 6],
          detections.clone(),
        )?)),
        "mrcnn_mask" => {
          let len = SLOTS * MASK_SIZE * MASK_SIZE * self.num_classes;
          results.push(AnyTensor::from(Tensor::from_shape_vec(
            &[1, SLOTS, MASK_SIZE, MASK_SIZE, self.num_classes],
            vec![0.9f32; len],
          )?))
        }
        other => return Err(InferenceError::MissingOutput(other.to_string())),
      }
    }
    Ok(results)
  }
}

/// 三类（含背景）、画布 64、不放大的模型包
pub fn package() -> Arc<ModelPackage> {
  let dir = tempfile::tempdir().unwrap();
  std::fs::write(
    dir.path().join("parameters.json"),
    r#"{
      "name": "scripted",
      "class_labels": ["BG", "cell", "seed"],
      "image_min_dimension": -1,
      "image_max_dimension": 64,
      "mean_pixels": [0.0, 0.0, 0.0]
    }"#,
  )
  .unwrap();
  Arc::new(ModelPackage::from_dir(dir.path()).unwrap())
}

/// `frames` 个 30x20 的灰度帧
pub fn stack(frames: usize) -> ImageStack {
  ImageStack::from_frames(
    (0..frames)
      .map(|i| ImageBuffer::from_yx(Array2::from_elem((30, 20), i as f32)))
      .collect(),
  )
}

/// 30x20 的帧在 64 画布中的窗口为 (17, 22, 47, 42)
pub fn cell(y1: f32, x1: f32, y2: f32, x2: f32, class_id: f32, score: f32) -> [f32; 6] {
  [y1 + 17.0, x1 + 22.0, y2 + 17.0, x2 + 22.0, class_id, score]
}
