// 该文件是 Xianwei （显微） 项目的一部分。
// src/batch.rs - 多帧检测结果汇总
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

use ndarray::{Array3, Axis, Ix2};
use serde::Serialize;

use crate::{decode::Detection, tensor::ShapeError};

/// 表格中 (x, y, width, height) 的取法
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CoordinateConvention {
  /// `(x1, y1, x2 - x1, y2 - y1)`
  #[default]
  Standard,
  /// 兼容旧版表格：宽高取 `x1 - x2`、`y1 - y2`，为负数
  Legacy,
}

/// 汇总表中的一行
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRow {
  pub id: usize,
  pub frame: usize,
  pub class_id: u32,
  pub class_label: String,
  pub score: f64,
  pub x: i64,
  pub y: i64,
  pub width: i64,
  pub height: i64,
}

/// 区域列表中的一个检测框
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Region {
  pub name: String,
  pub id: usize,
  pub frame: usize,
  pub x: i64,
  pub y: i64,
  pub width: i64,
  pub height: i64,
}

/// 四舍五入到整数像素的 (y1, x1, y2, x2)
fn pixel_box(detection: &Detection) -> (i64, i64, i64, i64) {
  let b = &detection.bbox;
  (
    b.y1.round() as i64,
    b.x1.round() as i64,
    b.y2.round() as i64,
    b.x2.round() as i64,
  )
}

/// 按 f32 的最短十进制表示扩宽为 f64
fn widen_score(score: f32) -> f64 {
  score.to_string().parse().unwrap_or(score as f64)
}

/// 整个图像栈的检测结果，按帧号升序
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionBatch {
  detections: Vec<Detection>,
  class_labels: Vec<String>,
  frame_count: usize,
}

impl DetectionBatch {
  pub fn new(class_labels: Vec<String>) -> Self {
    DetectionBatch {
      detections: Vec::new(),
      class_labels,
      frame_count: 0,
    }
  }

  /// 追加下一帧的结果，帧号即已追加的帧数
  pub fn push_frame(&mut self, detections: Vec<Detection>) {
    let frame = self.frame_count;
    self.detections.extend(detections.into_iter().map(|mut d| {
      d.frame_index = frame;
      d
    }));
    self.frame_count += 1;
  }

  pub fn detections(&self) -> &[Detection] {
    &self.detections
  }

  pub fn class_labels(&self) -> &[String] {
    &self.class_labels
  }

  pub fn frame_count(&self) -> usize {
    self.frame_count
  }

  pub fn len(&self) -> usize {
    self.detections.len()
  }

  pub fn is_empty(&self) -> bool {
    self.detections.is_empty()
  }

  /// 某一帧的检测数量
  pub fn count_in_frame(&self, frame: usize) -> usize {
    self
      .detections
      .iter()
      .filter(|d| d.frame_index == frame)
      .count()
  }

  pub fn table(&self, convention: CoordinateConvention) -> Vec<TableRow> {
    self
      .detections
      .iter()
      .enumerate()
      .map(|(id, d)| {
        let (y1, x1, y2, x2) = pixel_box(d);
        let (width, height) = match convention {
          CoordinateConvention::Standard => (x2 - x1, y2 - y1),
          CoordinateConvention::Legacy => (x1 - x2, y1 - y2),
        };
        TableRow {
          id,
          frame: d.frame_index,
          class_id: d.class_id,
          class_label: d.class_label.clone(),
          score: widen_score(d.score),
          x: x1,
          y: y1,
          width,
          height,
        }
      })
      .collect()
  }

  pub fn regions(&self) -> Vec<Region> {
    self
      .detections
      .iter()
      .enumerate()
      .map(|(id, d)| {
        let (y1, x1, y2, x2) = pixel_box(d);
        Region {
          name: format!(
            "BBox-{}-Score-{}-ClassID-{}-Frame-{}",
            id, d.score, d.class_id, d.frame_index
          ),
          id,
          frame: d.frame_index,
          x: x1,
          y: y1,
          width: x2 - x1,
          height: y2 - y1,
        }
      })
      .collect()
  }

  /// 所有掩码沿末尾新轴堆叠为 `[H, W, N]`
  ///
  /// 没有检测或检测不带掩码时返回 `Ok(None)`；掩码不是二维或尺寸不一致时报错。
  pub fn mask_volume(&self) -> Result<Option<Array3<f32>>, ShapeError> {
    let masks = self
      .detections
      .iter()
      .filter_map(|d| d.mask.as_ref())
      .map(|m| m.view().into_dimensionality::<Ix2>())
      .collect::<Result<Vec<_>, _>>()?;
    if masks.is_empty() {
      return Ok(None);
    }
    Ok(Some(ndarray::stack(Axis(2), &masks)?))
  }
}
