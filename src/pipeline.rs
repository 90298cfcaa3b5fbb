// 该文件是 Mengmian （蒙面） 项目的一部分。
// src/pipeline.rs - 匿名化流程控制
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

use std::fmt;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  config::{AnonymizerConfig, ExampleFaces},
  input::{DecodeError, ImageSource, decode},
  model::{Descriptor, Detection},
  output::EncodedImage,
  protocol::WorkerFault,
  worker::FaceInference,
};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PipelineState {
  #[default]
  Idle,
  LoadingExample,
  ExtractingExampleDescriptors,
  ProcessingTarget {
    index: usize,
    total: usize,
  },
  Done,
  Error(String),
}

impl fmt::Display for PipelineState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PipelineState::Idle => write!(f, "空闲"),
      PipelineState::LoadingExample => write!(f, "加载示例图像"),
      PipelineState::ExtractingExampleDescriptors => write!(f, "提取示例人脸特征"),
      PipelineState::ProcessingTarget { index, total } => {
        write!(f, "处理目标图像 {}/{}", index + 1, total)
      }
      PipelineState::Done => write!(f, "完成"),
      PipelineState::Error(reason) => write!(f, "错误: {}", reason),
    }
  }
}

/// 需要模糊的人脸
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineMode {
  /// 只模糊与示例图像中人脸匹配的人脸
  #[default]
  MatchExample,
  /// 模糊目标图像中的所有人脸，不需要示例图像
  AllFaces,
}

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("图像解码失败: {0}")]
  Decode(#[from] DecodeError),
  #[error("示例图像中没有找到人脸")]
  NoFaceFound,
  #[error("{0}")]
  Worker(#[from] WorkerFault),
}

impl PipelineError {
  /// 工作线程本身已不可用，需要重新创建
  pub fn is_worker_lost(&self) -> bool {
    matches!(self, PipelineError::Worker(fault) if fault.is_transport())
  }
}

/// 一张目标图像的处理结果
#[derive(Debug, Clone)]
pub struct OutputImage {
  pub target_index: usize,
  pub label: String,
  pub image: EncodedImage,
  /// 被模糊的人脸
  pub faces: Vec<Detection>,
}

impl OutputImage {
  pub fn faces_blurred(&self) -> usize {
    self.faces.len()
  }
}

#[derive(Debug)]
pub struct TargetFailure {
  pub target_index: usize,
  pub label: String,
  pub error: PipelineError,
}

/// 调用者可见的流程状态
#[derive(Debug, Default)]
pub struct PipelineSnapshot {
  pub state: PipelineState,
  pub is_loading: bool,
  pub error: Option<PipelineError>,
  /// 按目标图像顺序排列
  pub output_images: Vec<OutputImage>,
  pub target_failures: Vec<TargetFailure>,
}

/// 按需创建推理工作者
pub trait WorkerFactory {
  type Worker: FaceInference;

  fn create(&mut self) -> Result<Self::Worker, WorkerFault>;
}

impl<W: FaceInference, F: FnMut() -> Result<W, WorkerFault>> WorkerFactory for F {
  type Worker = W;

  fn create(&mut self) -> Result<W, WorkerFault> {
    self()
  }
}

pub trait StateObserver {
  fn on_state(&mut self, state: &PipelineState);
}

impl<F: FnMut(&PipelineState)> StateObserver for F {
  fn on_state(&mut self, state: &PipelineState) {
    self(state)
  }
}

pub struct PipelineController<F: WorkerFactory> {
  factory: F,
  worker: Option<F::Worker>,
  config: AnonymizerConfig,
  mode: PipelineMode,
  example: Option<ImageSource>,
  targets: Vec<ImageSource>,
  snapshot: PipelineSnapshot,
  observer: Option<Box<dyn StateObserver>>,
}

impl<F: WorkerFactory> PipelineController<F> {
  pub fn new(factory: F, config: AnonymizerConfig) -> Self {
    Self {
      factory,
      worker: None,
      config,
      mode: PipelineMode::default(),
      example: None,
      targets: Vec::new(),
      snapshot: PipelineSnapshot::default(),
      observer: None,
    }
  }

  pub fn mode(mut self, mode: PipelineMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn observer(mut self, observer: impl StateObserver + 'static) -> Self {
    self.observer = Some(Box::new(observer));
    self
  }

  pub fn load_example(&mut self, source: ImageSource) {
    debug!("设置示例图像: {}", source);
    self.example = Some(source);
  }

  pub fn load_targets(&mut self, sources: Vec<ImageSource>) {
    debug!("设置 {} 张目标图像", sources.len());
    self.targets = sources;
  }

  pub fn snapshot(&self) -> &PipelineSnapshot {
    &self.snapshot
  }

  /// 是否持有可用的工作者
  pub fn has_worker(&self) -> bool {
    self.worker.is_some()
  }

  /// 执行一次完整流程，错误记录在快照中
  pub fn process(&mut self) -> &PipelineSnapshot {
    let ready = match self.mode {
      PipelineMode::MatchExample => self.example.is_some(),
      PipelineMode::AllFaces => !self.targets.is_empty(),
    };
    if !ready {
      debug!("输入不完整，忽略本次处理");
      return &self.snapshot;
    }

    self.snapshot = PipelineSnapshot {
      is_loading: true,
      ..PipelineSnapshot::default()
    };

    let worker = match self.worker.take() {
      Some(worker) => worker,
      None => {
        info!("创建推理工作者");
        match self.factory.create() {
          Ok(worker) => worker,
          Err(fault) => {
            self.fail(fault.into());
            return &self.snapshot;
          }
        }
      }
    };

    match self.run(&worker) {
      Ok(()) => {
        self.worker = Some(worker);
        self.snapshot.is_loading = false;
        self.transition(PipelineState::Done);
        info!(
          "处理完成: {} 张输出, {} 张失败",
          self.snapshot.output_images.len(),
          self.snapshot.target_failures.len()
        );
      }
      Err(e) => {
        if e.is_worker_lost() {
          warn!("丢弃失效的推理工作者");
          drop(worker);
        } else {
          self.worker = Some(worker);
        }
        self.fail(e);
      }
    }

    &self.snapshot
  }

  fn run(&mut self, worker: &F::Worker) -> Result<(), PipelineError> {
    let examples = match self.mode {
      PipelineMode::MatchExample => Some(self.example_descriptors(worker)?),
      PipelineMode::AllFaces => None,
    };

    let total = self.targets.len();
    for index in 0..total {
      self.transition(PipelineState::ProcessingTarget { index, total });
      match self.process_target(worker, index, examples.as_deref()) {
        Ok(output) => {
          info!("{} 模糊了 {} 张人脸", output.label, output.faces_blurred());
          self.snapshot.output_images.push(output);
        }
        Err(e) if e.is_worker_lost() => return Err(e),
        Err(e) => {
          let label = self.targets[index].to_string();
          warn!("目标图像 {} 处理失败: {}", label, e);
          self.snapshot.target_failures.push(TargetFailure {
            target_index: index,
            label,
            error: e,
          });
        }
      }
    }

    Ok(())
  }

  fn example_descriptors(&mut self, worker: &F::Worker) -> Result<Vec<Descriptor>, PipelineError> {
    self.transition(PipelineState::LoadingExample);
    let example = match &self.example {
      Some(source) => decode(source)?,
      None => return Err(PipelineError::NoFaceFound),
    };

    self.transition(PipelineState::ExtractingExampleDescriptors);
    let faces = match self.config.example_faces {
      ExampleFaces::All => worker.extract_all_faces(example.into_payload())?,
      ExampleFaces::Prominent => worker
        .detect_example(example.into_payload())?
        .into_iter()
        .collect(),
    };

    if faces.is_empty() {
      return Err(PipelineError::NoFaceFound);
    }
    info!("示例图像中找到 {} 张人脸", faces.len());
    Ok(faces.into_iter().map(|face| face.descriptor).collect())
  }

  fn process_target(
    &self,
    worker: &F::Worker,
    index: usize,
    examples: Option<&[Descriptor]>,
  ) -> Result<OutputImage, PipelineError> {
    let source = &self.targets[index];
    let image = decode(source)?;

    // 每次调用都移交一份新的像素载荷
    let faces = match examples {
      Some(examples) => worker.detect_matching_faces(image.payload(), examples.to_vec())?,
      None => worker.extract_all_faces(image.payload())?,
    };
    let encoded = worker.draw_output_image(image.into_payload(), faces.clone())?;

    Ok(OutputImage {
      target_index: index,
      label: source.to_string(),
      image: encoded,
      faces,
    })
  }

  fn transition(&mut self, state: PipelineState) {
    debug!("流程状态: {}", state);
    if let Some(observer) = self.observer.as_mut() {
      observer.on_state(&state);
    }
    self.snapshot.state = state;
  }

  fn fail(&mut self, error: PipelineError) {
    warn!("处理失败: {}", error);
    self.snapshot.is_loading = false;
    self.transition(PipelineState::Error(error.to_string()));
    self.snapshot.error = Some(error);
  }
}

#[cfg(test)]
mod tests {
  use std::{
    cell::{Cell, RefCell},
    rc::Rc,
  };

  use image::RgbaImage;

  use super::*;
  use crate::{
    model::{BoundingBox, DESCRIPTOR_LEN},
    output::encode,
    protocol::{JobKind, Reply, Request},
  };

  /// 按图像宽度决定行为的工作者：宽度减一即人脸数，`fail_width` 的图像返回指定错误
  struct FakeWorker {
    fail_width: Option<(u32, WorkerFault)>,
    calls: Rc<RefCell<Vec<JobKind>>>,
  }

  fn faces(count: u32) -> Vec<Detection> {
    (0..count)
      .map(|i| {
        Detection::new(
          BoundingBox::new(i as f32, 0.0, 1.0, 1.0),
          0.9,
          Descriptor::new([0.0; DESCRIPTOR_LEN]),
        )
      })
      .collect()
  }

  impl FaceInference for FakeWorker {
    fn call(&self, request: Request) -> Result<Reply, WorkerFault> {
      self.calls.borrow_mut().push(request.kind());
      match request {
        Request::DetectExample(payload) => Ok(Reply::ExampleFace(faces(payload.width() - 1).pop())),
        Request::ExtractAllFaces(payload)
        | Request::DetectMatchingFaces { payload, .. } => {
          if let Some((width, fault)) = &self.fail_width
            && *width == payload.width()
          {
            return Err(fault.clone());
          }
          Ok(Reply::Faces(faces(payload.width() - 1)))
        }
        Request::DrawOutputImage { payload, .. } => encode(&payload.into_rgba_image())
          .map(Reply::Image)
          .map_err(|e| WorkerFault::Rejected(JobKind::DrawOutputImage, e.to_string())),
      }
    }
  }

  fn png(width: u32) -> ImageSource {
    ImageSource::Bytes(encode(&RgbaImage::new(width, 4)).unwrap().into_data())
  }

  struct Harness {
    created: Rc<Cell<usize>>,
    calls: Rc<RefCell<Vec<JobKind>>>,
  }

  fn controller(
    fail_width: Option<(u32, WorkerFault)>,
    config: AnonymizerConfig,
  ) -> (PipelineController<impl WorkerFactory<Worker = FakeWorker>>, Harness) {
    let created = Rc::new(Cell::new(0));
    let calls = Rc::new(RefCell::new(Vec::new()));
    let harness = Harness {
      created: created.clone(),
      calls: calls.clone(),
    };
    let factory = move || -> Result<FakeWorker, WorkerFault> {
      created.set(created.get() + 1);
      Ok(FakeWorker {
        fail_width: fail_width.clone(),
        calls: calls.clone(),
      })
    };
    (PipelineController::new(factory, config), harness)
  }

  #[test]
  fn process_without_example_is_a_no_op() {
    let (mut controller, harness) = controller(None, AnonymizerConfig::default());
    controller.load_targets(vec![png(2)]);
    let snapshot = controller.process();
    assert_eq!(snapshot.state, PipelineState::Idle);
    assert!(snapshot.error.is_none());
    assert_eq!(harness.created.get(), 0);
  }

  #[test]
  fn outputs_follow_target_order() {
    let (mut controller, _) = controller(None, AnonymizerConfig::default());
    controller.load_example(png(2));
    controller.load_targets(vec![png(4), png(1), png(3)]);
    let snapshot = controller.process();
    assert_eq!(snapshot.state, PipelineState::Done);
    let blurred: Vec<_> = snapshot
      .output_images
      .iter()
      .map(|o| (o.target_index, o.faces_blurred()))
      .collect();
    assert_eq!(blurred, vec![(0, 3), (1, 0), (2, 2)]);
  }

  #[test]
  fn rejected_target_is_recorded_and_the_run_continues() {
    let fault = WorkerFault::Rejected(JobKind::DetectMatchingFaces, "bad tensor".into());
    let (mut controller, harness) = controller(Some((5, fault)), AnonymizerConfig::default());
    controller.load_example(png(2));
    controller.load_targets(vec![png(2), png(5), png(3)]);
    let snapshot = controller.process();

    assert_eq!(snapshot.state, PipelineState::Done);
    assert_eq!(snapshot.output_images.len(), 2);
    assert_eq!(snapshot.target_failures.len(), 1);
    assert_eq!(snapshot.target_failures[0].target_index, 1);
    assert!(matches!(
      snapshot.target_failures[0].error,
      PipelineError::Worker(WorkerFault::Rejected(..))
    ));
    assert!(controller.has_worker());
    assert_eq!(harness.created.get(), 1);
  }

  #[test]
  fn transport_fault_aborts_and_recreates_the_worker() {
    let (mut controller, harness) =
      controller(
      Some((5, WorkerFault::Timeout(std::time::Duration::from_secs(1)))),
      AnonymizerConfig::default(),
    );
    controller.load_example(png(2));
    controller.load_targets(vec![png(2), png(5), png(3)]);

    let snapshot = controller.process();
    assert!(matches!(snapshot.state, PipelineState::Error(_)));
    assert!(matches!(
      snapshot.error,
      Some(PipelineError::Worker(WorkerFault::Timeout(_)))
    ));
    assert_eq!(snapshot.output_images.len(), 1);
    assert!(!controller.has_worker());

    controller.load_targets(vec![png(2)]);
    assert_eq!(controller.process().state, PipelineState::Done);
    assert_eq!(harness.created.get(), 2);
  }

  #[test]
  fn factory_failure_ends_in_error() {
    let mut controller = PipelineController::new(
      || -> Result<FakeWorker, WorkerFault> { Err(WorkerFault::ModelLoad("missing".into())) },
      AnonymizerConfig::default(),
    );
    controller.load_example(png(1));
    let snapshot = controller.process();
    assert!(!snapshot.is_loading);
    assert!(matches!(
      snapshot.error,
      Some(PipelineError::Worker(WorkerFault::ModelLoad(_)))
    ));
  }

  #[test]
  fn prominent_example_uses_detect_example() {
    let (mut controller, harness) = controller(
      None,
      AnonymizerConfig::default().example_faces(ExampleFaces::Prominent),
    );
    controller.load_example(png(4));
    controller.load_targets(vec![png(1)]);
    assert_eq!(controller.process().state, PipelineState::Done);
    assert_eq!(
      harness.calls.borrow().as_slice(),
      &[
        JobKind::DetectExample,
        JobKind::DetectMatchingFaces,
        JobKind::DrawOutputImage
      ]
    );
  }

  #[test]
  fn all_faces_mode_skips_the_example() {
    let (controller, harness) = controller(None, AnonymizerConfig::default());
    let mut controller = controller.mode(PipelineMode::AllFaces);
    controller.load_targets(vec![png(3)]);
    let snapshot = controller.process();
    assert_eq!(snapshot.state, PipelineState::Done);
    assert_eq!(snapshot.output_images[0].faces_blurred(), 2);
    assert_eq!(
      harness.calls.borrow().as_slice(),
      &[JobKind::ExtractAllFaces, JobKind::DrawOutputImage]
    );
  }

  #[test]
  fn observer_sees_every_transition() {
    let (controller, _) = controller(None, AnonymizerConfig::default());
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let mut controller = controller.observer(move |state: &PipelineState| {
      sink.borrow_mut().push(state.clone());
    });
    controller.load_example(png(2));
    controller.load_targets(vec![png(1), png(1)]);
    controller.process();

    assert_eq!(
      seen.borrow().as_slice(),
      &[
        PipelineState::LoadingExample,
        PipelineState::ExtractingExampleDescriptors,
        PipelineState::ProcessingTarget { index: 0, total: 2 },
        PipelineState::ProcessingTarget { index: 1, total: 2 },
        PipelineState::Done,
      ]
    );
  }
}
