// 该文件是 Xianwei （显微） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageReader};
use ndarray::{Array2, Array3};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Axis, ImageBuffer, ImageStack},
  tensor::ShapeError,
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配: 期望 {expected}, 实际 {found}")]
  SchemeMismatch {
    expected: &'static str,
    found: String,
  },
  #[error("读取 {path} 失败: {source}")]
  IoError {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[error("解码图像 {path} 失败: {source}")]
  ImageLoadError {
    path: String,
    #[source]
    source: image::ImageError,
  },
  #[error("目录 {0} 中没有图像文件")]
  EmptyFolder(String),
  #[error("{0}")]
  Shape(#[from] ShapeError),
}

const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "tif", "tiff", "bmp"];

/// 解码后转为原生轴顺序（列、行[、通道]）的浮点缓冲区
///
/// 灰度图保留原始取值（包括 16 位），彩色图丢弃 alpha 通道。
pub fn to_native_buffer(image: &DynamicImage) -> Result<ImageBuffer, ShapeError> {
  let (width, height) = (image.width() as usize, image.height() as usize);
  match image {
    DynamicImage::ImageLuma8(_)
    | DynamicImage::ImageLuma16(_)
    | DynamicImage::ImageLumaA8(_)
    | DynamicImage::ImageLumaA16(_) => {
      let gray = image.to_luma32f();
      // to_luma32f 会归一化到 [0, 1]，这里恢复原始量程
      let range = match image {
        DynamicImage::ImageLuma16(_) | DynamicImage::ImageLumaA16(_) => u16::MAX as f32,
        _ => u8::MAX as f32,
      };
      let data = Array2::from_shape_fn((width, height), |(x, y)| {
        (gray.get_pixel(x as u32, y as u32)[0] * range).round()
      });
      ImageBuffer::new(data.into_dyn(), vec![Axis::Column, Axis::Row])
    }
    DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => {
      let rgb = image.to_rgb32f();
      let data = Array3::from_shape_fn((width, height, 3), |(x, y, c)| {
        rgb.get_pixel(x as u32, y as u32)[c]
      });
      ImageBuffer::new(data.into_dyn(), vec![Axis::Column, Axis::Row, Axis::Channel])
    }
    DynamicImage::ImageRgb16(_) | DynamicImage::ImageRgba16(_) => {
      let rgb = image.to_rgb16();
      let data = Array3::from_shape_fn((width, height, 3), |(x, y, c)| {
        rgb.get_pixel(x as u32, y as u32)[c] as f32
      });
      ImageBuffer::new(data.into_dyn(), vec![Axis::Column, Axis::Row, Axis::Channel])
    }
    _ => {
      let rgb = image.to_rgb8();
      let data = Array3::from_shape_fn((width, height, 3), |(x, y, c)| {
        rgb.get_pixel(x as u32, y as u32)[c] as f32
      });
      ImageBuffer::new(data.into_dyn(), vec![Axis::Column, Axis::Row, Axis::Channel])
    }
  }
}

fn read_frame(path: &Path) -> Result<ImageBuffer, ImageFileInputError> {
  let display = path.display().to_string();
  let image = ImageReader::open(path)
    .map_err(|source| ImageFileInputError::IoError {
      path: display.clone(),
      source,
    })?
    .with_guessed_format()
    .map_err(|source| ImageFileInputError::IoError {
      path: display.clone(),
      source,
    })?
    .decode()
    .map_err(|source| ImageFileInputError::ImageLoadError {
      path: display.clone(),
      source,
    })?;
  debug!(
    "读取图像 {}: {}x{} {:?}",
    path.display(),
    image.width(),
    image.height(),
    image.color()
  );
  Ok(to_native_buffer(&image)?)
}

/// 单个图像文件，`image:///path/to/file.tif`
pub struct ImageFileInput {
  path: PathBuf,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemeMismatch {
        expected: Self::SCHEME,
        found: url.scheme().to_string(),
      });
    }
    Ok(ImageFileInput {
      path: PathBuf::from(url.path()),
    })
  }
}

impl ImageFileInput {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    ImageFileInput { path: path.into() }
  }

  pub fn into_stack(self) -> Result<ImageStack, ImageFileInputError> {
    let frame = read_frame(&self.path)?;
    Ok(ImageStack::from_frames(vec![frame]))
  }
}

/// 目录中的图像按文件名排序组成图像栈，`folder:///path/to/dir`
pub struct ImageFolderInput {
  directory: PathBuf,
}

impl FromUrlWithScheme for ImageFolderInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for ImageFolderInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ImageFileInputError::SchemeMismatch {
        expected: Self::SCHEME,
        found: url.scheme().to_string(),
      });
    }
    Ok(ImageFolderInput {
      directory: PathBuf::from(url.path()),
    })
  }
}

impl ImageFolderInput {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    ImageFolderInput {
      directory: directory.into(),
    }
  }

  fn frame_paths(&self) -> Result<Vec<PathBuf>, ImageFileInputError> {
    let io_error = |source| ImageFileInputError::IoError {
      path: self.directory.display().to_string(),
      source,
    };
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(&self.directory).map_err(io_error)? {
      let path = entry.map_err(io_error)?.path();
      let is_image = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
      if path.is_file() && is_image {
        paths.push(path);
      }
    }
    paths.sort();
    Ok(paths)
  }

  pub fn into_stack(self) -> Result<ImageStack, ImageFileInputError> {
    let paths = self.frame_paths()?;
    if paths.is_empty() {
      return Err(ImageFileInputError::EmptyFolder(
        self.directory.display().to_string(),
      ));
    }
    let frames = paths
      .iter()
      .map(|path| read_frame(path))
      .collect::<Result<Vec<_>, _>>()?;
    Ok(ImageStack::from_frames(frames))
  }
}
