// 该文件是 Xianwei （显微） 项目的一部分。
// src/task.rs - 图像栈检测任务
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

use std::{
  fmt,
  sync::Arc,
  time::{Duration, Instant},
};

use ndarray::Array3;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
  batch::{CoordinateConvention, DetectionBatch, Region, TableRow},
  decode::{DecodeConfig, Detection, RawDetectionSet, decode_frame},
  frame::{ImageBuffer, ImageStack, InputValidationError, to_model_order},
  model::{InferenceBackend, InferenceError, InferenceHandle, ModelLoadError, ModelPackage},
  mold::{MoldingResult, encode_metadata, mold_image},
  output::Render,
  tensor::{AnyTensor, ConversionError, NamedTensors, ShapeError, Tensor},
};

/// 单帧处理阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
  Preprocess,
  Infer,
  Postprocess,
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Stage::Preprocess => "预处理",
      Stage::Infer => "推理",
      Stage::Postprocess => "后处理",
    };
    f.write_str(name)
  }
}

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("{0}")]
  Shape(#[from] ShapeError),
  #[error("{0}")]
  Inference(#[from] InferenceError),
  #[error("{0}")]
  Conversion(#[from] ConversionError),
}

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("输入无效: {0}")]
  Input(#[from] InputValidationError),
  #[error("模型加载失败: {0}")]
  ModelLoad(#[from] ModelLoadError),
  #[error("第 {frame} 帧{stage}失败: {source}")]
  Frame {
    frame: usize,
    stage: Stage,
    #[source]
    source: FrameError,
  },
  #[error("汇总结果失败: {0}")]
  Aggregate(#[source] ShapeError),
}

impl TaskError {
  fn frame(frame: usize, stage: Stage) -> impl FnOnce(FrameError) -> TaskError {
    move |source| TaskError::Frame {
      frame,
      stage,
      source,
    }
  }
}

/// 单次运行的选项
#[derive(Debug, Clone, PartialEq)]
pub struct DetectOptions {
  pub want_masks: bool,
  pub convention: CoordinateConvention,
  /// 覆盖模型包中的掩码阈值
  pub mask_threshold: Option<f32>,
}

impl Default for DetectOptions {
  fn default() -> Self {
    DetectOptions {
      want_masks: true,
      convention: CoordinateConvention::Standard,
      mask_threshold: None,
    }
  }
}

/// 整个图像栈的检测输出
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionOutput {
  pub batch: DetectionBatch,
  pub table: Vec<TableRow>,
  pub regions: Vec<Region>,
  pub mask_volume: Option<Array3<f32>>,
}

impl DetectionOutput {
  /// 由逐帧结果生成表格、区域与掩码体
  pub fn aggregate(batch: DetectionBatch, convention: CoordinateConvention) -> Result<Self, ShapeError> {
    Ok(DetectionOutput {
      table: batch.table(convention),
      regions: batch.regions(),
      mask_volume: batch.mask_volume()?,
      batch,
    })
  }
}

/// 分阶段计时，每次读数后从当前时刻重新开始
struct StageClock {
  last: Instant,
}

impl StageClock {
  fn start() -> Self {
    StageClock { last: Instant::now() }
  }

  fn lap(&mut self) -> Duration {
    let now = Instant::now();
    let elapsed = now.duration_since(self.last);
    self.last = now;
    elapsed
  }
}

/// 在一次运行期间独占推理句柄，任何退出路径上都会释放
struct ScopedHandle<H: InferenceHandle> {
  handle: H,
  model: String,
  acquired: Instant,
}

impl<H: InferenceHandle> ScopedHandle<H> {
  fn acquire<B>(backend: &B, package: &ModelPackage) -> Result<Self, ModelLoadError>
  where
    B: InferenceBackend<Handle = H>,
  {
    let now = Instant::now();
    let handle = backend.load(package)?;
    info!("推理句柄加载完成, 耗时: {:.2?}", now.elapsed());
    Ok(ScopedHandle {
      handle,
      model: package.name().to_string(),
      acquired: Instant::now(),
    })
  }
}

impl<H: InferenceHandle> Drop for ScopedHandle<H> {
  fn drop(&mut self) {
    info!(
      "释放模型 {} 的推理句柄, 持有时间: {:.2?}",
      self.model,
      self.acquired.elapsed()
    );
  }
}

/// 塑形后的一帧及其模型输入
struct PreparedFrame {
  molding: MoldingResult,
  inputs: NamedTensors,
}

/// 图像栈检测器
pub struct Detector<B: InferenceBackend> {
  backend: B,
  package: Arc<ModelPackage>,
  options: DetectOptions,
}

impl<B: InferenceBackend> Detector<B> {
  pub fn new(backend: B, package: Arc<ModelPackage>) -> Self {
    Detector {
      backend,
      package,
      options: DetectOptions::default(),
    }
  }

  pub fn with_options(mut self, options: DetectOptions) -> Self {
    self.options = options;
    self
  }

  pub fn package(&self) -> &ModelPackage {
    &self.package
  }

  pub fn options(&self) -> &DetectOptions {
    &self.options
  }

  fn decode_config(&self) -> DecodeConfig {
    DecodeConfig {
      want_masks: self.options.want_masks,
      mask_threshold: self.options.mask_threshold.or(self.package.mask_threshold()),
      min_mask_area: self.package.min_mask_area(),
    }
  }

  /// 每帧新建输入表
  fn preprocess(&self, index: usize, frame: &ImageBuffer) -> Result<PreparedFrame, FrameError> {
    let package = &self.package;
    let nodes = package.input_nodes();

    let ordered = to_model_order(frame)?;
    let molding = mold_image(&ordered, package.mold_config())?;
    let image_id = u32::try_from(index)
      .map_err(|_| ShapeError::new(format!("帧号 {} 超出元数据范围", index)))?;
    let meta = encode_metadata(image_id, &molding, package.active_class_ids())?;
    debug!(
      "第 {} 帧塑形: {:?} -> {:?}, 窗口 {:?}, scale {}",
      index, molding.original_shape, molding.molded_shape, molding.window, molding.scale
    );

    let image = Tensor::from_array(molding.image.view().to_owned()).insert_batch_axis();
    let mut inputs = NamedTensors::new();
    inputs.insert(nodes.image.clone(), AnyTensor::from(image));
    inputs.insert(
      nodes.image_meta.clone(),
      AnyTensor::from(meta.to_tensor().insert_batch_axis()),
    );
    if let Some(anchors) = package.anchors() {
      let anchors = if anchors.ndim() == 2 {
        anchors.clone().insert_batch_axis()
      } else {
        anchors.clone()
      };
      inputs.insert(nodes.anchors.clone(), AnyTensor::from(anchors));
    }

    Ok(PreparedFrame { molding, inputs })
  }

  fn postprocess(
    &self,
    index: usize,
    outputs: &[AnyTensor],
    molding: &MoldingResult,
    config: &DecodeConfig,
  ) -> Result<Vec<Detection>, FrameError> {
    let nodes = self.package.output_nodes();
    let detections = outputs
      .first()
      .ok_or_else(|| InferenceError::MissingOutput(nodes.detections.clone()))?
      .to_f32()?;
    let masks = if config.needs_masks() {
      let masks = outputs
        .get(1)
        .ok_or_else(|| InferenceError::MissingOutput(nodes.mask.clone()))?;
      Some(masks.to_f32()?)
    } else {
      None
    };

    let raw = RawDetectionSet::from_model_outputs(&detections, masks.as_ref())?;
    let decoded = decode_frame(
      index,
      &raw,
      molding,
      self.package.class_labels(),
      config,
    )?;
    Ok(decoded)
  }

  /// 对整个图像栈运行检测
  ///
  /// 任意一帧失败则整个运行失败；全部为空时返回空结果而非错误。
  pub fn detect(&self, stack: &ImageStack) -> Result<DetectionOutput, TaskError> {
    info!("开始检测, 共 {} 帧", stack.len());
    let started = Instant::now();

    stack.validate(self.package.mold_config().max_dimension)?;

    let mut handle = ScopedHandle::acquire(&self.backend, &self.package)?;
    let config = self.decode_config();
    let requested = self.package.output_nodes().requested(config.needs_masks());
    let signatures = self.package.input_signatures();
    let mut batch = DetectionBatch::new(self.package.class_labels().to_vec());

    for (index, frame) in stack.frames().iter().enumerate() {
      let mut clock = StageClock::start();
      let prepared = self.preprocess(index, frame).map_err(TaskError::frame(index, Stage::Preprocess))?;
      let elapsed_pre = clock.lap();

      let outputs = signatures
        .iter()
        .try_for_each(|signature| signature.check(&prepared.inputs))
        .and_then(|()| handle.handle.run(&prepared.inputs, &requested))
        .map_err(FrameError::from)
        .map_err(TaskError::frame(index, Stage::Infer))?;
      let elapsed_infer = clock.lap();

      let detections = self
        .postprocess(index, &outputs, &prepared.molding, &config)
        .map_err(TaskError::frame(index, Stage::Postprocess))?;
      let elapsed_post = clock.lap();

      info!(
        "第 {} 帧完成: {} 个检测, 耗时: {:.2?} / {:.2?} / {:.2?}",
        index,
        detections.len(),
        elapsed_pre,
        elapsed_infer,
        elapsed_post
      );
      batch.push_frame(detections);
    }

    drop(handle);

    let output =
      DetectionOutput::aggregate(batch, self.options.convention).map_err(TaskError::Aggregate)?;
    info!(
      "检测完成: {} 帧, {} 个检测, 总耗时: {:.2?}",
      output.batch.frame_count(),
      output.batch.len(),
      started.elapsed()
    );
    Ok(output)
  }
}

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 检测一个图像栈并渲染结果
pub struct StackTask;

impl<B, O, RE> Task<ImageStack, Detector<B>, O> for StackTask
where
  B: InferenceBackend,
  RE: std::error::Error + Send + Sync + 'static,
  O: Render<ImageStack, DetectionOutput, Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task(self, input: ImageStack, model: Detector<B>, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let result = model.detect(&input).inspect_err(|e| error!("检测失败: {}", e))?;
    let now = Instant::now();
    output.render_result(&input, &result)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());
    Ok(())
  }
}
