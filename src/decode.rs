// 该文件是 Xianwei （显微） 项目的一部分。
// src/decode.rs - 检测结果解码
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

use ndarray::{Array2, Array3, ArrayView2, Axis, Ix2, Ix3, Ix4, s};
use tracing::debug;

use crate::{
  frame::ImageBuffer,
  mold::{MoldingResult, resize_bilinear_2d},
  tensor::{ShapeError, Tensor},
};

/// 背景类别，模型用全零行填充未使用的检测槽位
pub const BACKGROUND_CLASS: u32 = 0;
pub const UNKNOWN_LABEL: &str = "unknown";

const DETECTION_FIELDS: usize = 6;
const DEFAULT_AREA_THRESHOLD: f32 = 0.5;

/// 原图像素坐标下的检测框，右下为开区间
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
  pub y1: f32,
  pub x1: f32,
  pub y2: f32,
  pub x2: f32,
}

impl BoundingBox {
  pub fn x(&self) -> f32 {
    self.x1
  }

  pub fn y(&self) -> f32 {
    self.y1
  }

  pub fn width(&self) -> f32 {
    self.x2 - self.x1
  }

  pub fn height(&self) -> f32 {
    self.y2 - self.y1
  }
}

/// 每个实例的原始掩码
#[derive(Debug, Clone, PartialEq)]
pub enum RawMasks {
  /// `[N, H, W]`，覆盖整张塑形画布
  Molded(Array3<f32>),
  /// `[N, mh, mw]`，相对于各自检测框，类别通道已选定
  BoxRelative(Array3<f32>),
}

impl RawMasks {
  fn len(&self) -> usize {
    match self {
      RawMasks::Molded(m) | RawMasks::BoxRelative(m) => m.len_of(Axis(0)),
    }
  }
}

/// 单帧推理的原始输出，各数组长度一致（含填充行）
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetectionSet {
  boxes: Array2<f32>,
  class_ids: Vec<u32>,
  scores: Vec<f32>,
  masks: Option<RawMasks>,
}

impl RawDetectionSet {
  /// `boxes` 为 `[N, 4]` 的归一化 (y1, x1, y2, x2)
  pub fn new(
    boxes: Array2<f32>,
    class_ids: Vec<u32>,
    scores: Vec<f32>,
    masks: Option<RawMasks>,
  ) -> Result<Self, ShapeError> {
    if boxes.ncols() != 4 {
      return Err(ShapeError::new(format!(
        "检测框需要 4 列, 实际为 {}",
        boxes.ncols()
      )));
    }
    let n = boxes.nrows();
    if class_ids.len() != n || scores.len() != n {
      return Err(ShapeError::new(format!(
        "检测数组长度不一致: boxes {}, class_ids {}, scores {}",
        n,
        class_ids.len(),
        scores.len()
      )));
    }
    if let Some(masks) = &masks {
      if masks.len() != n {
        return Err(ShapeError::new(format!(
          "掩码数量 {} 与检测数量 {} 不一致",
          masks.len(),
          n
        )));
      }
    }
    Ok(RawDetectionSet {
      boxes,
      class_ids,
      scores,
      masks,
    })
  }

  /// 由 `detections` 与可选的掩码输出构造
  ///
  /// `detections` 为 `[1?, N, 6]`，每行 (y1, x1, y2, x2, class_id, score)。
  /// 掩码为 `[1?, N, mh, mw, num_classes]` 时按类别选通道，
  /// 为 `[1?, N, H, W]` 时视为整张画布的掩码。
  pub fn from_model_outputs(
    detections: &Tensor<f32>,
    masks: Option<&Tensor<f32>>,
  ) -> Result<Self, ShapeError> {
    // 只有三维输出才带批次维，`[1, 6]` 是单个检测槽位
    let detections = if detections.ndim() == 3 {
      detections.clone().squeeze_batch_axis()
    } else {
      detections.clone()
    };
    let detections = detections.into_array().into_dimensionality::<Ix2>()?;
    if detections.ncols() != DETECTION_FIELDS {
      return Err(ShapeError::new(format!(
        "detections 每行需要 {} 个值, 实际为 {}",
        DETECTION_FIELDS,
        detections.ncols()
      )));
    }

    let boxes = detections.slice(s![.., 0..4]).to_owned();
    let class_ids: Vec<u32> = detections
      .column(4)
      .iter()
      .map(|v| if v.is_finite() && *v > 0.0 { v.round() as u32 } else { BACKGROUND_CLASS })
      .collect();
    let scores: Vec<f32> = detections.column(5).to_vec();

    let masks = match masks {
      None => None,
      Some(tensor) => {
        let array = tensor.clone().into_array();
        let array = if array.ndim() == 5 && array.shape()[0] == 1 {
          array.index_axis_move(Axis(0), 0)
        } else if array.ndim() == 4 && array.shape()[0] == 1 && array.shape()[1] == class_ids.len()
        {
          array.index_axis_move(Axis(0), 0)
        } else {
          array
        };
        match array.ndim() {
          4 => {
            let per_class = array.into_dimensionality::<Ix4>()?;
            Some(RawMasks::BoxRelative(select_class_channel(
              &per_class,
              &class_ids,
            )?))
          }
          3 => Some(RawMasks::Molded(array.into_dimensionality::<Ix3>()?)),
          _ => {
            return Err(ShapeError::new(format!(
              "掩码输出形状 {:?} 不受支持",
              array.shape()
            )));
          }
        }
      }
    };

    RawDetectionSet::new(boxes, class_ids, scores, masks)
  }

  pub fn len(&self) -> usize {
    self.class_ids.len()
  }

  pub fn is_empty(&self) -> bool {
    self.class_ids.is_empty()
  }

  pub fn class_ids(&self) -> &[u32] {
    &self.class_ids
  }

  pub fn scores(&self) -> &[f32] {
    &self.scores
  }

  pub fn masks(&self) -> Option<&RawMasks> {
    self.masks.as_ref()
  }
}

fn select_class_channel(
  per_class: &ndarray::Array4<f32>,
  class_ids: &[u32],
) -> Result<Array3<f32>, ShapeError> {
  let (n, mh, mw, num_classes) = per_class.dim();
  if n != class_ids.len() {
    return Err(ShapeError::new(format!(
      "掩码数量 {} 与检测数量 {} 不一致",
      n,
      class_ids.len()
    )));
  }
  let mut selected = Array3::zeros((n, mh, mw));
  for (i, class_id) in class_ids.iter().enumerate() {
    let channel = *class_id as usize;
    if channel >= num_classes {
      return Err(ShapeError::new(format!(
        "类别 {} 超出掩码通道数 {}",
        class_id, num_classes
      )));
    }
    selected
      .index_axis_mut(Axis(0), i)
      .assign(&per_class.slice(s![i, .., .., channel]));
  }
  Ok(selected)
}

/// 解码得到的一个实例
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub frame_index: usize,
  pub bbox: BoundingBox,
  pub class_id: u32,
  pub class_label: String,
  pub score: f32,
  /// 原图尺寸的掩码
  pub mask: Option<ImageBuffer>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodeConfig {
  pub want_masks: bool,
  /// `None` 保留软掩码
  pub mask_threshold: Option<f32>,
  /// 掩码前景像素数不超过该值的实例被丢弃，0 表示不过滤
  pub min_mask_area: usize,
}

impl Default for DecodeConfig {
  fn default() -> Self {
    DecodeConfig {
      want_masks: true,
      mask_threshold: Some(DEFAULT_AREA_THRESHOLD),
      min_mask_area: 0,
    }
  }
}

impl DecodeConfig {
  /// 是否需要模型输出掩码
  pub fn needs_masks(&self) -> bool {
    self.want_masks || self.min_mask_area > 0
  }
}

pub fn class_label(labels: &[String], class_id: u32) -> &str {
  labels
    .get(class_id as usize)
    .map(String::as_str)
    .unwrap_or(UNKNOWN_LABEL)
}

/// 裁剪到闭区间 `[0, max]`；右下边为开区间，贴边的框其 `x2`/`y2` 等于图像宽高
fn clip(value: f32, max: usize) -> f32 {
  value.clamp(0.0, max as f32)
}

fn pixel(value: f32, max: usize) -> usize {
  (value.round().max(0.0) as usize).min(max)
}

/// 整张画布的掩码：裁剪到窗口后缩放回原图尺寸
fn unmold_canvas_mask(
  mask: ArrayView2<'_, f32>,
  molding: &MoldingResult,
) -> Array2<f32> {
  let (mask_h, mask_w) = mask.dim();
  let [molded_h, molded_w, _] = molding.molded_shape;
  let [orig_h, orig_w, _] = molding.original_shape;
  let window = molding.window;

  // 掩码分辨率可能与画布不同，按比例换算窗口
  let ry = mask_h as f32 / molded_h as f32;
  let rx = mask_w as f32 / molded_w as f32;
  let y1 = pixel(window.y1 as f32 * ry, mask_h);
  let x1 = pixel(window.x1 as f32 * rx, mask_w);
  let y2 = pixel(window.y2 as f32 * ry, mask_h).max(y1);
  let x2 = pixel(window.x2 as f32 * rx, mask_w).max(x1);

  resize_bilinear_2d(mask.slice(s![y1..y2, x1..x2]), orig_h, orig_w)
}

/// 相对检测框的小掩码：缩放到框大小后贴回原图尺寸的画布
fn unmold_box_mask(
  mask: ArrayView2<'_, f32>,
  bbox: &BoundingBox,
  molding: &MoldingResult,
) -> Array2<f32> {
  let [orig_h, orig_w, _] = molding.original_shape;
  let mut full = Array2::zeros((orig_h, orig_w));

  let y1 = pixel(bbox.y1, orig_h);
  let x1 = pixel(bbox.x1, orig_w);
  let y2 = pixel(bbox.y2, orig_h);
  let x2 = pixel(bbox.x2, orig_w);
  if y2 <= y1 || x2 <= x1 {
    return full;
  }

  let resized = resize_bilinear_2d(mask, y2 - y1, x2 - x1);
  full.slice_mut(s![y1..y2, x1..x2]).assign(&resized);
  full
}

/// 将一帧的原始输出解码为原图坐标下的检测
pub fn decode_frame(
  frame_index: usize,
  raw: &RawDetectionSet,
  molding: &MoldingResult,
  labels: &[String],
  config: &DecodeConfig,
) -> Result<Vec<Detection>, ShapeError> {
  let [molded_h, molded_w, _] = molding.molded_shape;
  let [orig_h, orig_w, _] = molding.original_shape;
  let area_threshold = config.mask_threshold.unwrap_or(DEFAULT_AREA_THRESHOLD);

  let masks = if config.needs_masks() {
    raw.masks.as_ref()
  } else {
    None
  };

  let mut detections = Vec::new();
  let mut dropped = 0usize;

  for (i, class_id) in raw.class_ids.iter().copied().enumerate() {
    if class_id == BACKGROUND_CLASS {
      continue;
    }

    let row = raw.boxes.row(i);
    let (y1, x1) = molding.to_original(row[0] * molded_h as f32, row[1] * molded_w as f32);
    let (y2, x2) = molding.to_original(row[2] * molded_h as f32, row[3] * molded_w as f32);
    let bbox = BoundingBox {
      y1: clip(y1, orig_h),
      x1: clip(x1, orig_w),
      y2: clip(y2, orig_h),
      x2: clip(x2, orig_w),
    };

    let mask = masks.map(|masks| {
      let mut mask = match masks {
        RawMasks::Molded(m) => unmold_canvas_mask(m.index_axis(Axis(0), i), molding),
        RawMasks::BoxRelative(m) => unmold_box_mask(m.index_axis(Axis(0), i), &bbox, molding),
      };
      if let Some(threshold) = config.mask_threshold {
        mask.mapv_inplace(|v| if v >= threshold { 1.0 } else { 0.0 });
      }
      mask
    });

    if config.min_mask_area > 0 {
      if let Some(mask) = &mask {
        let area = mask.iter().filter(|v| **v >= area_threshold).count();
        if area <= config.min_mask_area {
          dropped += 1;
          continue;
        }
      }
    }

    detections.push(Detection {
      frame_index,
      bbox,
      class_id,
      class_label: class_label(labels, class_id).to_string(),
      score: raw.scores[i],
      mask: if config.want_masks {
        mask.map(ImageBuffer::from_yx)
      } else {
        None
      },
    });
  }

  debug!(
    "第 {} 帧解码完成: {} 行原始输出, {} 个检测, {} 个因掩码面积过小被丢弃",
    frame_index,
    raw.len(),
    detections.len(),
    dropped
  );

  Ok(detections)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mold::Window;
  use ndarray::{Array4, arr2};

  fn labels() -> Vec<String> {
    vec!["BG".to_string(), "cell".to_string(), "seed".to_string()]
  }

  /// 61x25 的图像放在 256 画布中，scale = 1
  fn molding() -> MoldingResult {
    MoldingResult {
      image: ImageBuffer::from_yxc(Array3::zeros((256, 256, 3))),
      original_shape: [61, 25, 3],
      molded_shape: [256, 256, 3],
      window: Window {
        y1: 97,
        x1: 115,
        y2: 158,
        x2: 140,
      },
      scale: 1.0,
    }
  }

  fn norm(v: f32) -> f32 {
    v / 256.0
  }

  #[test]
  fn mismatched_lengths_are_rejected() {
    let boxes = Array2::zeros((2, 4));
    assert!(RawDetectionSet::new(boxes.clone(), vec![1], vec![0.9, 0.8], None).is_err());
    assert!(RawDetectionSet::new(boxes.clone(), vec![1, 1], vec![0.9], None).is_err());
    let masks = RawMasks::Molded(Array3::zeros((3, 4, 4)));
    assert!(RawDetectionSet::new(boxes, vec![1, 1], vec![0.9, 0.8], Some(masks)).is_err());
    assert!(RawDetectionSet::new(Array2::zeros((2, 3)), vec![1, 1], vec![0.9, 0.8], None).is_err());
  }

  #[test]
  fn padding_rows_are_skipped_and_order_kept() {
    let boxes = arr2(&[
      [norm(100.0), norm(120.0), norm(110.0), norm(130.0)],
      [0.0, 0.0, 0.0, 0.0],
      [norm(97.0), norm(115.0), norm(158.0), norm(140.0)],
    ]);
    let raw = RawDetectionSet::new(boxes, vec![2, 0, 1], vec![0.9, 0.0, 0.7], None).unwrap();
    let config = DecodeConfig {
      want_masks: false,
      ..DecodeConfig::default()
    };
    let detections = decode_frame(3, &raw, &molding(), &labels(), &config).unwrap();

    assert_eq!(detections.len(), 2);
    assert_eq!(detections[0].class_id, 2);
    assert_eq!(detections[0].class_label, "seed");
    assert_eq!(detections[0].frame_index, 3);
    let b = detections[0].bbox;
    assert!((b.y1 - 3.0).abs() < 1e-3 && (b.x1 - 5.0).abs() < 1e-3);
    assert!((b.height() - 10.0).abs() < 1e-3 && (b.width() - 10.0).abs() < 1e-3);

    let full = detections[1].bbox;
    assert!(full.y1.abs() < 1e-3 && full.x1.abs() < 1e-3);
    assert!((full.y2 - 61.0).abs() < 1e-3 && (full.x2 - 25.0).abs() < 1e-3);
  }

  #[test]
  fn boxes_are_clipped_to_original_image() {
    let boxes = arr2(&[[0.0, 0.0, 1.0, 1.0]]);
    let raw = RawDetectionSet::new(boxes, vec![1], vec![0.5], None).unwrap();
    let detections = decode_frame(0, &raw, &molding(), &labels(), &DecodeConfig::default()).unwrap();
    let b = detections[0].bbox;
    assert_eq!((b.y1, b.x1, b.y2, b.x2), (0.0, 0.0, 61.0, 25.0));
  }

  #[test]
  fn scaled_boxes_are_divided_by_scale() {
    let mut m = molding();
    m.scale = 2.0;
    m.original_shape = [30, 12, 3];
    let boxes = arr2(&[[norm(117.0), norm(125.0), norm(137.0), norm(135.0)]]);
    let raw = RawDetectionSet::new(boxes, vec![1], vec![0.5], None).unwrap();
    let detections = decode_frame(0, &raw, &m, &labels(), &DecodeConfig::default()).unwrap();
    let b = detections[0].bbox;
    assert!((b.y1 - 10.0).abs() < 1e-3 && (b.x1 - 5.0).abs() < 1e-3);
    assert!((b.y2 - 20.0).abs() < 1e-3 && (b.x2 - 10.0).abs() < 1e-3);
  }

  #[test]
  fn unknown_class_ids_get_fallback_label() {
    let raw = RawDetectionSet::new(Array2::zeros((1, 4)), vec![9], vec![0.5], None).unwrap();
    let detections = decode_frame(0, &raw, &molding(), &labels(), &DecodeConfig::default()).unwrap();
    assert_eq!(detections[0].class_label, UNKNOWN_LABEL);
  }

  #[test]
  fn canvas_masks_are_cropped_to_window() {
    let mut canvas = Array3::zeros((1, 256, 256));
    canvas.slice_mut(s![0, 97..158, 115..140]).fill(0.9);
    let raw = RawDetectionSet::new(
      arr2(&[[norm(97.0), norm(115.0), norm(158.0), norm(140.0)]]),
      vec![1],
      vec![0.9],
      Some(RawMasks::Molded(canvas)),
    )
    .unwrap();
    let detections = decode_frame(0, &raw, &molding(), &labels(), &DecodeConfig::default()).unwrap();
    let mask = detections[0].mask.as_ref().unwrap();
    assert_eq!(mask.shape(), &[61, 25]);
    assert!(mask.view().iter().all(|v| *v == 1.0));
  }

  #[test]
  fn box_relative_masks_are_pasted_into_box() {
    let raw = RawDetectionSet::new(
      arr2(&[[norm(107.0), norm(120.0), norm(117.0), norm(130.0)]]),
      vec![1],
      vec![0.9],
      Some(RawMasks::BoxRelative(Array3::from_elem((1, 4, 4), 0.8))),
    )
    .unwrap();
    let detections = decode_frame(0, &raw, &molding(), &labels(), &DecodeConfig::default()).unwrap();
    let mask = detections[0].mask.as_ref().unwrap().view();
    assert_eq!(mask.shape(), &[61, 25]);
    assert_eq!(mask.iter().filter(|v| **v == 1.0).count(), 100);
    assert_eq!(mask[[10, 5]], 1.0);
    assert_eq!(mask[[9, 5]], 0.0);
  }

  #[test]
  fn soft_masks_are_kept_without_threshold() {
    let raw = RawDetectionSet::new(
      arr2(&[[norm(107.0), norm(120.0), norm(117.0), norm(130.0)]]),
      vec![1],
      vec![0.9],
      Some(RawMasks::BoxRelative(Array3::from_elem((1, 2, 2), 0.3))),
    )
    .unwrap();
    let config = DecodeConfig {
      mask_threshold: None,
      ..DecodeConfig::default()
    };
    let detections = decode_frame(0, &raw, &molding(), &labels(), &config).unwrap();
    let mask = detections[0].mask.as_ref().unwrap().view();
    assert!((mask[[12, 7]] - 0.3).abs() < 1e-6);
  }

  #[test]
  fn small_masks_are_filtered() {
    let raw = RawDetectionSet::new(
      arr2(&[
        [norm(107.0), norm(120.0), norm(117.0), norm(130.0)],
        [norm(100.0), norm(120.0), norm(102.0), norm(122.0)],
      ]),
      vec![1, 1],
      vec![0.9, 0.8],
      Some(RawMasks::BoxRelative(Array3::from_elem((2, 4, 4), 0.8))),
    )
    .unwrap();
    let config = DecodeConfig {
      want_masks: false,
      min_mask_area: 4,
      ..DecodeConfig::default()
    };
    let detections = decode_frame(0, &raw, &molding(), &labels(), &config).unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].score, 0.9);
    assert!(detections[0].mask.is_none());
  }

  #[test]
  fn model_outputs_select_mask_channel_by_class() {
    let detections = Tensor::from_shape_vec(
      &[1, 2, 6],
      vec![
        0.1, 0.2, 0.3, 0.4, 2.0, 0.95, //
        0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
      ],
    )
    .unwrap();
    let mut masks = Array4::<f32>::zeros((2, 3, 3, 3));
    masks.slice_mut(s![0, .., .., 2]).fill(0.7);
    let masks = Tensor::from_array(masks.insert_axis(Axis(0)));

    let raw = RawDetectionSet::from_model_outputs(&detections, Some(&masks)).unwrap();
    assert_eq!(raw.len(), 2);
    assert_eq!(raw.class_ids(), &[2, 0]);
    assert_eq!(raw.scores(), &[0.95, 0.0]);
    match raw.masks() {
      Some(RawMasks::BoxRelative(m)) => {
        assert_eq!(m.dim(), (2, 3, 3));
        assert!(m.index_axis(Axis(0), 0).iter().all(|v| *v == 0.7));
      }
      other => panic!("unexpected masks {:?}", other),
    }
  }

  #[test]
  fn single_slot_output_without_batch_axis() {
    let detections =
      Tensor::from_shape_vec(&[1, 6], vec![0.1, 0.2, 0.3, 0.4, 1.0, 0.9]).unwrap();
    let raw = RawDetectionSet::from_model_outputs(&detections, None).unwrap();
    assert_eq!(raw.len(), 1);
    assert_eq!(raw.class_ids(), &[1]);
    assert_eq!(raw.scores(), &[0.9]);

    let batched = Tensor::from_shape_vec(&[1, 1, 6], vec![0.1, 0.2, 0.3, 0.4, 1.0, 0.9]).unwrap();
    assert_eq!(RawDetectionSet::from_model_outputs(&batched, None).unwrap(), raw);
  }

  #[test]
  fn boxes_touching_the_border_keep_full_extent() {
    let boxes = arr2(&[[norm(150.0), norm(130.0), norm(170.0), norm(150.0)]]);
    let raw = RawDetectionSet::new(boxes, vec![1], vec![0.5], None).unwrap();
    let detections = decode_frame(0, &raw, &molding(), &labels(), &DecodeConfig::default()).unwrap();
    let b = detections[0].bbox;
    assert_eq!((b.y2, b.x2), (61.0, 25.0));
    assert!((b.width() - 10.0).abs() < 1e-3);
  }

  #[test]
  fn model_outputs_reject_bad_detection_width() {
    let detections = Tensor::from_shape_vec(&[1, 5], vec![0.0; 5]).unwrap();
    assert!(RawDetectionSet::from_model_outputs(&detections, None).is_err());
  }
}
