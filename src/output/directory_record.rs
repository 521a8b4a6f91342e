// 该文件是 Xianwei （显微） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

//! 输出目录结构：
//!
//! ```text
//! <dir>/<YYYY>/<MM>/<DD>/<HH-MM-SS>/
//!   detections.csv
//!   regions.json
//!   masks/mask-<id>-frame-<frame>.png
//!   previews/frame-<frame>.png
//! ```

use std::{
  fs,
  path::{Path, PathBuf},
};

use chrono::{Datelike, Local};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  FromUrl, FromUrlWithScheme,
  batch::TableRow,
  frame::ImageStack,
  output::{
    Render,
    draw::{Draw, mask_to_gray},
  },
  task::DetectionOutput,
  tensor::ShapeError,
};

const TABLE_FILE: &str = "detections.csv";
const REGIONS_FILE: &str = "regions.json";
const MASKS_DIR: &str = "masks";
const PREVIEWS_DIR: &str = "previews";
const TABLE_COLUMNS: [&str; 9] = [
  "id",
  "frame",
  "class_id",
  "class_label",
  "score",
  "x",
  "y",
  "width",
  "height",
];

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("CSV 写入错误: {0}")]
  CsvError(#[from] csv::Error),
  #[error("{0}")]
  Shape(#[from] ShapeError),
}

/// 记录内容
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
  /// 表格、区域、掩码与预览图
  Full,
  /// 仅表格与区域
  Table,
}

pub struct DirectoryRecordOutput {
  directory: PathBuf,
  kind: RecordKind,
  dated: bool,
  draw: Draw,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let mut output = DirectoryRecordOutput::new(uri.path());
    for (k, v) in uri.query_pairs() {
      match k.as_ref() {
        "record" if v == "table" => output.kind = RecordKind::Table,
        "flat" => output.dated = false,
        _ => {}
      }
    }
    Ok(output)
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    DirectoryRecordOutput {
      directory: directory.into(),
      kind: RecordKind::Full,
      dated: true,
      draw: Draw::default(),
    }
  }

  pub fn kind(mut self, kind: RecordKind) -> Self {
    self.kind = kind;
    self
  }

  /// 直接写入给定目录，不建日期子目录
  pub fn flat(mut self) -> Self {
    self.dated = false;
    self
  }

  fn run_path(&self) -> Result<PathBuf, std::io::Error> {
    let directory = if self.dated {
      let now = Local::now();
      self
        .directory
        .join(now.year().to_string())
        .join(format!("{:02}", now.month()))
        .join(format!("{:02}", now.day()))
        .join(now.format("%H-%M-%S").to_string())
    } else {
      self.directory.clone()
    };
    fs::create_dir_all(&directory)?;
    Ok(directory)
  }

  fn write_table(&self, path: &Path, rows: &[TableRow]) -> Result<(), DirectoryRecordOutputError> {
    // 没有检测时也要有表头，因此表头单独写出
    let mut writer = csv::WriterBuilder::new()
      .has_headers(false)
      .from_path(path)?;
    writer.write_record(TABLE_COLUMNS)?;
    for row in rows {
      writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
  }

  fn write_masks(
    &self,
    directory: &Path,
    result: &DetectionOutput,
  ) -> Result<usize, DirectoryRecordOutputError> {
    let mut written = 0;
    for (id, detection) in result.batch.detections().iter().enumerate() {
      let Some(mask) = &detection.mask else {
        continue;
      };
      if written == 0 {
        fs::create_dir_all(directory)?;
      }
      let path = directory.join(format!(
        "mask-{:04}-frame-{}.png",
        id, detection.frame_index
      ));
      mask_to_gray(mask)?.save(&path)?;
      written += 1;
    }
    Ok(written)
  }

  fn write_previews(
    &self,
    directory: &Path,
    stack: &ImageStack,
    result: &DetectionOutput,
  ) -> Result<(), DirectoryRecordOutputError> {
    fs::create_dir_all(directory)?;
    let detections = result.batch.detections();
    for (index, frame) in stack.frames().iter().enumerate() {
      let start = detections.partition_point(|d| d.frame_index < index);
      let end = detections.partition_point(|d| d.frame_index <= index);
      let image = self.draw.draw_detection(frame, &detections[start..end])?;
      image.save(directory.join(format!("frame-{:04}.png", index)))?;
    }
    Ok(())
  }
}

impl Render<ImageStack, DetectionOutput> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(
    &self,
    frame: &ImageStack,
    result: &DetectionOutput,
  ) -> Result<(), Self::Error> {
    let directory = self.run_path()?;
    info!("写入检测结果: {}", directory.display());

    self.write_table(&directory.join(TABLE_FILE), &result.table)?;
    fs::write(
      directory.join(REGIONS_FILE),
      serde_json::to_string_pretty(&result.regions)?,
    )?;

    if self.kind == RecordKind::Full {
      let masks = self.write_masks(&directory.join(MASKS_DIR), result)?;
      debug!("写入 {} 个掩码", masks);
      self.write_previews(&directory.join(PREVIEWS_DIR), frame, result)?;
    }
    Ok(())
  }
}
