// 该文件是 Xianwei （显微） 项目的一部分。
// src/model/package.rs - 模型包加载
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

//! 模型包是一个目录，或内容相同的 ZIP 压缩包：
//!
//! - `parameters.json` 或 `parameters.yml`：塑形参数、类别标签、节点名称等
//! - `labels.txt`：没有 `class_labels` 时使用，第一行为模型名称
//! - 计算图文件（默认 `model.onnx`）
//! - 可选的锚框文件（小端 f32）
//!
//! 压缩包解压到临时目录，目录随最后一个 `ModelPackage` 副本一起删除。

use std::{
  fs::File,
  path::{Path, PathBuf},
  sync::Arc,
};

use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{InputNodes, InputSignature, ModelLoadError, OutputNodes},
  mold::{MoldConfig, meta::META_FIXED_LEN},
  tensor::Tensor,
};

const PARAMETERS_FILE: &str = "parameters.json";
const PARAMETERS_YAML_FILES: [&str; 2] = ["parameters.yml", "parameters.yaml"];
const ARCHIVE_EXTENSION: &str = "zip";
const LABELS_FILE: &str = "labels.txt";
const DEFAULT_GRAPH_FILE: &str = "model.onnx";
const DEFAULT_MASK_THRESHOLD: f32 = 0.5;
const FILE_SCHEME: &str = "file";

/// 锚框文件描述
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AnchorSpec {
  pub file: String,
  /// 缺省时按 `[N, 4]` 解释
  #[serde(default)]
  pub shape: Option<Vec<usize>>,
}

fn default_min_dimension() -> i64 {
  10
}

fn default_max_dimension() -> i64 {
  512
}

fn default_minimum_scale() -> f32 {
  1.0
}

fn default_mean_pixels() -> [f32; 3] {
  [123.7, 116.8, 103.9]
}

fn default_true() -> bool {
  true
}

fn default_mask_threshold() -> Option<f32> {
  Some(DEFAULT_MASK_THRESHOLD)
}

fn default_graph() -> String {
  DEFAULT_GRAPH_FILE.to_string()
}

#[derive(Debug, Deserialize)]
struct Parameters {
  #[serde(default)]
  name: Option<String>,
  #[serde(default)]
  class_labels: Option<Vec<String>>,
  #[serde(default = "default_min_dimension")]
  image_min_dimension: i64,
  #[serde(default = "default_max_dimension")]
  image_max_dimension: i64,
  #[serde(default = "default_minimum_scale")]
  minimum_scale: f32,
  #[serde(default = "default_mean_pixels")]
  mean_pixels: [f32; 3],
  #[serde(default = "default_true")]
  pad: bool,
  #[serde(default = "default_mask_threshold")]
  mask_threshold: Option<f32>,
  #[serde(default)]
  min_mask_area: usize,
  #[serde(default)]
  rescale_intensity: bool,
  #[serde(default)]
  active_class_ids: Vec<usize>,
  #[serde(default = "default_graph")]
  graph: String,
  #[serde(default)]
  anchors: Option<AnchorSpec>,
  #[serde(default)]
  input_nodes: InputNodes,
  #[serde(default)]
  output_nodes: OutputNodes,
}

impl Default for Parameters {
  fn default() -> Self {
    Parameters {
      name: None,
      class_labels: None,
      image_min_dimension: default_min_dimension(),
      image_max_dimension: default_max_dimension(),
      minimum_scale: default_minimum_scale(),
      mean_pixels: default_mean_pixels(),
      pad: true,
      mask_threshold: default_mask_threshold(),
      min_mask_area: 0,
      rescale_intensity: false,
      active_class_ids: Vec::new(),
      graph: default_graph(),
      anchors: None,
      input_nodes: InputNodes::default(),
      output_nodes: OutputNodes::default(),
    }
  }
}

/// 已解析的模型包，加载后只读
#[derive(Debug, Clone)]
pub struct ModelPackage {
  root: PathBuf,
  name: String,
  class_labels: Vec<String>,
  mold: MoldConfig,
  mask_threshold: Option<f32>,
  min_mask_area: usize,
  active_class_ids: Vec<bool>,
  graph: PathBuf,
  anchors: Option<Tensor<f32>>,
  input_nodes: InputNodes,
  output_nodes: OutputNodes,
  /// 从压缩包加载时持有解压目录
  bundle: Option<Arc<tempfile::TempDir>>,
}

impl FromUrlWithScheme for ModelPackage {
  const SCHEME: &'static str = "maskrcnn";
}

impl FromUrl for ModelPackage {
  type Error = ModelLoadError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let scheme = url.scheme();
    if scheme != Self::SCHEME && scheme != FILE_SCHEME {
      return Err(ModelLoadError::UnsupportedLocation(format!(
        "{} (仅支持 {}:// 与 {}:// 本地目录或压缩包)",
        url,
        Self::SCHEME,
        FILE_SCHEME
      )));
    }
    if url.host_str().is_some_and(|host| !host.is_empty() && host != "localhost") {
      return Err(ModelLoadError::UnsupportedLocation(format!(
        "{} (不支持远程主机)",
        url
      )));
    }
    ModelPackage::from_path(url.path())
  }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ModelLoadError + '_ {
  move |source| ModelLoadError::Io {
    path: path.display().to_string(),
    source,
  }
}

fn read_text(path: &Path) -> Result<String, ModelLoadError> {
  std::fs::read_to_string(path).map_err(io_error(path))
}

/// 依次查找 JSON 与 YAML 参数文件，都没有时使用默认参数
fn read_parameters(root: &Path) -> Result<Parameters, ModelLoadError> {
  let json_path = root.join(PARAMETERS_FILE);
  if json_path.is_file() {
    let text = read_text(&json_path)?;
    return serde_json::from_str(&text).map_err(|source| ModelLoadError::MalformedConfig {
      path: json_path.display().to_string(),
      source,
    });
  }

  for name in PARAMETERS_YAML_FILES {
    let yaml_path = root.join(name);
    if yaml_path.is_file() {
      let text = read_text(&yaml_path)?;
      return serde_yaml::from_str(&text).map_err(|source| ModelLoadError::MalformedYaml {
        path: yaml_path.display().to_string(),
        source,
      });
    }
  }

  warn!("模型包缺少参数文件, 使用默认参数");
  Ok(Parameters::default())
}

fn has_config(dir: &Path) -> bool {
  std::iter::once(PARAMETERS_FILE)
    .chain(PARAMETERS_YAML_FILES)
    .chain(std::iter::once(LABELS_FILE))
    .any(|name| dir.join(name).is_file())
}

/// 压缩包内容可能包在一层同名目录里
fn bundle_root(dir: &Path) -> Result<PathBuf, ModelLoadError> {
  if has_config(dir) {
    return Ok(dir.to_path_buf());
  }
  let entries = std::fs::read_dir(dir)
    .map_err(io_error(dir))?
    .collect::<Result<Vec<_>, _>>()
    .map_err(io_error(dir))?;
  match entries.as_slice() {
    [single] if single.path().is_dir() => Ok(single.path()),
    _ => Ok(dir.to_path_buf()),
  }
}

fn dimension(value: i64, field: &str) -> Result<Option<u32>, ModelLoadError> {
  match value {
    -1 => Ok(None),
    v if v > 0 && v <= u32::MAX as i64 => Ok(Some(v as u32)),
    v => Err(ModelLoadError::InvalidConfig(format!(
      "{} 必须为正整数或 -1, 实际为 {}",
      field, v
    ))),
  }
}

/// 第一行为模型名称，其余非空行为类别标签
fn parse_labels(text: &str) -> Option<(String, Vec<String>)> {
  let mut lines = text.lines().map(str::trim);
  let name = lines.next()?.to_string();
  let labels: Vec<String> = lines
    .filter(|line| !line.is_empty())
    .map(str::to_string)
    .collect();
  Some((name, labels))
}

fn load_anchors(root: &Path, spec: &AnchorSpec) -> Result<Tensor<f32>, ModelLoadError> {
  let path = root.join(&spec.file);
  let bytes = std::fs::read(&path).map_err(io_error(&path))?;
  if bytes.len() % 4 != 0 {
    return Err(ModelLoadError::InvalidConfig(format!(
      "锚框文件 {} 长度 {} 不是 4 的倍数",
      path.display(),
      bytes.len()
    )));
  }
  let values: Vec<f32> = bytes
    .chunks_exact(4)
    .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
    .collect();
  let shape = spec
    .shape
    .clone()
    .unwrap_or_else(|| vec![values.len() / 4, 4]);
  debug!("锚框形状: {:?}", shape);
  Tensor::from_shape_vec(&shape, values)
    .map_err(|e| ModelLoadError::InvalidConfig(format!("锚框文件 {}: {}", path.display(), e)))
}

impl ModelPackage {
  /// 按路径类型选择目录或压缩包
  pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ModelLoadError> {
    let path = path.as_ref();
    let is_archive = path.is_file()
      && path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(ARCHIVE_EXTENSION));
    if is_archive {
      ModelPackage::from_archive(path)
    } else {
      ModelPackage::from_dir(path)
    }
  }

  /// 解压 ZIP 模型包后按目录加载
  pub fn from_archive(path: impl AsRef<Path>) -> Result<Self, ModelLoadError> {
    let path = path.as_ref();
    info!("解压模型包: {}", path.display());
    let archive_error = |source: zip::result::ZipError| ModelLoadError::Archive {
      path: path.display().to_string(),
      source,
    };

    let file = File::open(path).map_err(io_error(path))?;
    let mut archive = zip::ZipArchive::new(file).map_err(archive_error)?;
    let bundle = tempfile::Builder::new()
      .prefix("xianwei-model-")
      .tempdir()
      .map_err(io_error(path))?;
    archive.extract(bundle.path()).map_err(archive_error)?;
    debug!("{} 个文件解压到 {}", archive.len(), bundle.path().display());

    let root = bundle_root(bundle.path())?;
    let mut package = ModelPackage::from_dir(&root)?;
    package.bundle = Some(Arc::new(bundle));
    Ok(package)
  }

  pub fn from_dir(root: impl AsRef<Path>) -> Result<Self, ModelLoadError> {
    let root = root.as_ref().to_path_buf();
    info!("加载模型包: {}", root.display());

    if !root.is_dir() {
      return Err(ModelLoadError::Io {
        path: root.display().to_string(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "模型包目录不存在"),
      });
    }

    let parameters = read_parameters(&root)?;

    let (name, class_labels) = match parameters.class_labels {
      Some(labels) => (parameters.name.unwrap_or_default(), labels),
      None => {
        let labels_path = root.join(LABELS_FILE);
        if !labels_path.exists() {
          return Err(ModelLoadError::MissingConfig(format!(
            "class_labels 或 {}",
            LABELS_FILE
          )));
        }
        let (file_name, labels) = parse_labels(&read_text(&labels_path)?)
          .ok_or_else(|| ModelLoadError::MissingConfig(format!("{} 为空", LABELS_FILE)))?;
        (parameters.name.unwrap_or(file_name), labels)
      }
    };
    if class_labels.is_empty() {
      return Err(ModelLoadError::MissingConfig("类别标签为空".to_string()));
    }

    let num_classes = class_labels.len();
    let mut active_class_ids = vec![false; num_classes];
    for id in parameters.active_class_ids {
      let slot = active_class_ids.get_mut(id).ok_or_else(|| {
        ModelLoadError::InvalidConfig(format!(
          "active_class_ids 中的类别 {} 超出类别数 {}",
          id, num_classes
        ))
      })?;
      *slot = true;
    }

    let mold = MoldConfig {
      min_dimension: dimension(parameters.image_min_dimension, "image_min_dimension")?,
      max_dimension: dimension(parameters.image_max_dimension, "image_max_dimension")?,
      min_scale: parameters.minimum_scale,
      pad: parameters.pad,
      mean_pixel: parameters.mean_pixels,
      rescale_intensity: parameters.rescale_intensity,
    };
    if mold.pad && mold.max_dimension.is_none() {
      return Err(ModelLoadError::InvalidConfig(
        "pad 为 true 时必须设置 image_max_dimension".to_string(),
      ));
    }
    if !(mold.min_scale.is_finite() && mold.min_scale > 0.0) {
      return Err(ModelLoadError::InvalidConfig(format!(
        "minimum_scale 必须为正数, 实际为 {}",
        mold.min_scale
      )));
    }
    if let Some(threshold) = parameters.mask_threshold {
      if !(0.0..=1.0).contains(&threshold) {
        return Err(ModelLoadError::InvalidConfig(format!(
          "mask_threshold 必须在 [0, 1] 之间, 实际为 {}",
          threshold
        )));
      }
    }

    let anchors = parameters
      .anchors
      .as_ref()
      .map(|spec| load_anchors(&root, spec))
      .transpose()?;

    info!(
      "模型 {} 加载完成: {} 个类别, 输入边长 {:?}",
      name, num_classes, mold.max_dimension
    );

    Ok(ModelPackage {
      graph: root.join(&parameters.graph),
      root,
      name,
      class_labels,
      mold,
      mask_threshold: parameters.mask_threshold,
      min_mask_area: parameters.min_mask_area,
      active_class_ids,
      anchors,
      input_nodes: parameters.input_nodes,
      output_nodes: parameters.output_nodes,
      bundle: None,
    })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn class_labels(&self) -> &[String] {
    &self.class_labels
  }

  pub fn num_classes(&self) -> usize {
    self.class_labels.len()
  }

  pub fn mold_config(&self) -> &MoldConfig {
    &self.mold
  }

  pub fn mask_threshold(&self) -> Option<f32> {
    self.mask_threshold
  }

  pub fn min_mask_area(&self) -> usize {
    self.min_mask_area
  }

  pub fn active_class_ids(&self) -> &[bool] {
    &self.active_class_ids
  }

  pub fn graph_path(&self) -> &Path {
    &self.graph
  }

  pub fn anchors(&self) -> Option<&Tensor<f32>> {
    self.anchors.as_ref()
  }

  pub fn input_nodes(&self) -> &InputNodes {
    &self.input_nodes
  }

  pub fn output_nodes(&self) -> &OutputNodes {
    &self.output_nodes
  }

  pub fn is_bundled(&self) -> bool {
    self.bundle.is_some()
  }

  /// 每帧输入应满足的形状，带批次维
  ///
  /// 填充时图像边长固定为 `image_max_dimension`，否则不限。
  pub fn input_signatures(&self) -> Vec<InputSignature> {
    let side = match (self.mold.pad, self.mold.max_dimension) {
      (true, Some(max_dim)) => Some(max_dim as usize),
      _ => None,
    };
    let mut signatures = vec![
      InputSignature::new(
        self.input_nodes.image.clone(),
        vec![Some(1), side, side, Some(3)],
      ),
      InputSignature::new(
        self.input_nodes.image_meta.clone(),
        vec![Some(1), Some(META_FIXED_LEN + self.active_class_ids.len())],
      ),
    ];
    if let Some(anchors) = &self.anchors {
      let mut shape: Vec<Option<usize>> = anchors.shape().iter().copied().map(Some).collect();
      if anchors.ndim() == 2 {
        shape.insert(0, Some(1));
      }
      signatures.push(InputSignature::new(self.input_nodes.anchors.clone(), shape));
    }
    signatures
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;

  fn write(dir: &Path, name: &str, content: &str) {
    fs::write(dir.join(name), content).unwrap();
  }

  const YAML_PARAMETERS: &str = "\
image_min_dimension: 64
image_max_dimension: 128
minimum_scale: 1.0
mean_pixels: [10.0, 20.0, 30.0]
class_ids: [0, 1, 2]
backbone_strides: [4, 8, 16, 32, 64]
rpn_anchor_scales: [8, 16, 32, 64, 128]
rpn_anchor_ratios: [0.5, 1, 2]
rpn_anchor_stride: 1
";

  fn write_zip(path: &Path, prefix: &str, files: &[(&str, &str)]) {
    let mut writer = zip::ZipWriter::new(fs::File::create(path).unwrap());
    let options = zip::write::SimpleFileOptions::default()
      .compression_method(zip::CompressionMethod::Stored);
    for (name, content) in files {
      writer
        .start_file(format!("{}{}", prefix, name), options)
        .unwrap();
      std::io::Write::write_all(&mut writer, content.as_bytes()).unwrap();
    }
    writer.finish().unwrap();
  }

  #[test]
  fn labels_file_supplies_name_and_labels() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), LABELS_FILE, "microtubule\nBG\nseed\nplus_end\n");

    let package = ModelPackage::from_dir(dir.path()).unwrap();
    assert_eq!(package.name(), "microtubule");
    assert_eq!(package.class_labels(), &["BG", "seed", "plus_end"]);
    assert_eq!(package.mold_config(), &MoldConfig::default());
    assert_eq!(package.active_class_ids(), &[false, false, false]);
    assert_eq!(package.mask_threshold(), Some(0.5));
    assert!(package.anchors().is_none());
  }

  #[test]
  fn parameters_override_defaults() {
    let dir = tempfile::tempdir().unwrap();
    write(
      dir.path(),
      PARAMETERS_FILE,
      r#"{
        "name": "cells",
        "class_labels": ["BG", "cell"],
        "image_min_dimension": -1,
        "image_max_dimension": 256,
        "mean_pixels": [1.0, 2.0, 3.0],
        "mask_threshold": null,
        "min_mask_area": 12,
        "rescale_intensity": true,
        "active_class_ids": [0, 1],
        "graph": "cells.onnx",
        "output_nodes": {"mask": "masks"}
      }"#,
    );

    let package = ModelPackage::from_dir(dir.path()).unwrap();
    assert_eq!(package.name(), "cells");
    assert_eq!(package.num_classes(), 2);
    let mold = package.mold_config();
    assert_eq!(mold.min_dimension, None);
    assert_eq!(mold.max_dimension, Some(256));
    assert_eq!(mold.mean_pixel, [1.0, 2.0, 3.0]);
    assert!(mold.rescale_intensity);
    assert_eq!(package.mask_threshold(), None);
    assert_eq!(package.min_mask_area(), 12);
    assert_eq!(package.active_class_ids(), &[true, true]);
    assert_eq!(package.graph_path(), dir.path().join("cells.onnx"));
    assert_eq!(package.output_nodes().mask, "masks");
    assert_eq!(package.output_nodes().detections, "detections");
  }

  #[test]
  fn anchors_are_read_as_little_endian_f32() {
    let dir = tempfile::tempdir().unwrap();
    write(
      dir.path(),
      PARAMETERS_FILE,
      r#"{"class_labels": ["BG", "a"], "anchors": {"file": "anchors.bin"}}"#,
    );
    let bytes: Vec<u8> = [0.0f32, 0.25, 0.5, 1.0, -1.0, 0.0, 2.0, 3.0]
      .iter()
      .flat_map(|v| v.to_le_bytes())
      .collect();
    fs::write(dir.path().join("anchors.bin"), bytes).unwrap();

    let package = ModelPackage::from_dir(dir.path()).unwrap();
    let anchors = package.anchors().unwrap();
    assert_eq!(anchors.shape(), &[2, 4]);
    assert_eq!(anchors.to_vec()[1], 0.25);
    assert_eq!(anchors.to_vec()[4], -1.0);
  }

  #[test]
  fn missing_labels_is_a_load_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
      ModelPackage::from_dir(dir.path()),
      Err(ModelLoadError::MissingConfig(_))
    ));
  }

  #[test]
  fn malformed_parameters_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), PARAMETERS_FILE, "{ not json");
    assert!(matches!(
      ModelPackage::from_dir(dir.path()),
      Err(ModelLoadError::MalformedConfig { .. })
    ));
  }

  #[test]
  fn out_of_range_active_class_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write(
      dir.path(),
      PARAMETERS_FILE,
      r#"{"class_labels": ["BG", "a"], "active_class_ids": [2]}"#,
    );
    assert!(matches!(
      ModelPackage::from_dir(dir.path()),
      Err(ModelLoadError::InvalidConfig(_))
    ));
  }

  #[test]
  fn yaml_parameters_are_read() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "parameters.yml", YAML_PARAMETERS);
    write(dir.path(), LABELS_FILE, "microtubule\nBG\nseed\nplus_end\n");

    let package = ModelPackage::from_dir(dir.path()).unwrap();
    assert_eq!(package.name(), "microtubule");
    assert_eq!(package.num_classes(), 3);
    let mold = package.mold_config();
    assert_eq!(mold.min_dimension, Some(64));
    assert_eq!(mold.max_dimension, Some(128));
    assert_eq!(mold.mean_pixel, [10.0, 20.0, 30.0]);
    assert!(!package.is_bundled());
  }

  #[test]
  fn malformed_yaml_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "parameters.yml", "image_max_dimension: [unclosed");
    write(dir.path(), LABELS_FILE, "m\nBG\n");
    assert!(matches!(
      ModelPackage::from_dir(dir.path()),
      Err(ModelLoadError::MalformedYaml { .. })
    ));
  }

  #[test]
  fn zip_bundle_is_extracted_and_kept_alive() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("microtubule.zip");
    write_zip(
      &archive,
      "",
      &[
        ("parameters.yml", YAML_PARAMETERS),
        (LABELS_FILE, "microtubule\nBG\nseed\nplus_end\n"),
      ],
    );

    let url = Url::parse(&format!("maskrcnn://{}", archive.display())).unwrap();
    let package = ModelPackage::from_url(&url).unwrap();
    assert!(package.is_bundled());
    assert_eq!(package.class_labels(), &["BG", "seed", "plus_end"]);
    assert_eq!(package.mold_config().max_dimension, Some(128));
    assert_eq!(package.graph_path(), package.root().join("model.onnx"));

    let root = package.root().to_path_buf();
    let copy = package.clone();
    drop(package);
    assert!(root.join(LABELS_FILE).exists());
    drop(copy);
    assert!(!root.exists());
  }

  #[test]
  fn zip_bundle_with_top_level_folder() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("cells.zip");
    write_zip(&archive, "cells/", &[(LABELS_FILE, "cells\nBG\ncell\n")]);

    let package = ModelPackage::from_path(&archive).unwrap();
    assert_eq!(package.name(), "cells");
    assert!(package.root().ends_with("cells"));
  }

  #[test]
  fn corrupt_zip_is_an_archive_error() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("broken.zip");
    fs::write(&archive, b"not a zip archive").unwrap();
    assert!(matches!(
      ModelPackage::from_path(&archive),
      Err(ModelLoadError::Archive { .. })
    ));
  }

  #[test]
  fn input_signatures_follow_configuration() {
    let dir = tempfile::tempdir().unwrap();
    write(
      dir.path(),
      PARAMETERS_FILE,
      r#"{"class_labels": ["BG", "a", "b"], "image_max_dimension": 256, "anchors": {"file": "anchors.bin"}}"#,
    );
    fs::write(dir.path().join("anchors.bin"), vec![0u8; 3 * 4 * 4]).unwrap();

    let package = ModelPackage::from_dir(dir.path()).unwrap();
    let signatures = package.input_signatures();
    assert_eq!(signatures.len(), 3);
    assert_eq!(signatures[0].name, "input_image");
    assert_eq!(signatures[0].shape, vec![Some(1), Some(256), Some(256), Some(3)]);
    assert_eq!(signatures[1].shape, vec![Some(1), Some(15)]);
    assert_eq!(signatures[2].name, "input_anchors");
    assert_eq!(signatures[2].shape, vec![Some(1), Some(3), Some(4)]);

    write(
      dir.path(),
      PARAMETERS_FILE,
      r#"{"class_labels": ["BG", "a"], "pad": false}"#,
    );
    let unpadded = ModelPackage::from_dir(dir.path()).unwrap();
    assert_eq!(
      unpadded.input_signatures()[0].shape,
      vec![Some(1), None, None, Some(3)]
    );
  }

  #[test]
  fn url_schemes() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), LABELS_FILE, "m\nBG\n");
    let path = dir.path().display();

    let url = Url::parse(&format!("maskrcnn://{}", path)).unwrap();
    assert!(ModelPackage::from_url(&url).is_ok());
    let url = Url::parse(&format!("file://{}", path)).unwrap();
    assert!(ModelPackage::from_url(&url).is_ok());

    let url = Url::parse("https://example.org/model.zip").unwrap();
    assert!(matches!(
      ModelPackage::from_url(&url),
      Err(ModelLoadError::UnsupportedLocation(_))
    ));
  }
}
