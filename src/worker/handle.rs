// 该文件是 Mengmian （蒙面） 项目的一部分。
// src/worker/handle.rs - 推理工作线程句柄与调用关联
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
  collections::HashMap,
  sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, AtomicU64, Ordering},
    mpsc::{self, Receiver, RecvTimeoutError, Sender},
  },
  thread,
  time::Duration,
};

use tracing::{debug, error, info, warn};

use crate::{
  config::AnonymizerConfig,
  matcher::Matcher,
  model::{FaceModel, ModelError, ModelState},
  output::draw::BlurRenderer,
  protocol::{CallId, Envelope, JobKind, Reply, Request, WorkerFault},
  worker::{FaceInference, InferenceService},
};

type Waiter = Sender<Result<Reply, WorkerFault>>;
type PendingTable = Arc<Mutex<HashMap<CallId, Waiter>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 推理工作线程构建器
///
/// `loader` 在工作线程内执行，模型只在该线程上创建和使用。
pub struct WorkerBuilder<F> {
  loader: F,
  name: String,
  config: AnonymizerConfig,
}

impl<F> WorkerBuilder<F> {
  pub fn new(loader: F) -> Self {
    Self {
      loader,
      name: "mengmian-worker".to_string(),
      config: AnonymizerConfig::default(),
    }
  }

  pub fn name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  pub fn config(mut self, config: &AnonymizerConfig) -> Self {
    self.config = config.clone();
    self
  }

  /// 启动工作线程并等待模型加载完成
  pub fn spawn<M>(self) -> Result<WorkerHandle, WorkerFault>
  where
    F: FnOnce() -> Result<M, ModelError> + Send + 'static,
    M: FaceModel + 'static,
  {
    let WorkerBuilder {
      loader,
      name,
      config,
    } = self;

    let (request_tx, request_rx) = mpsc::channel::<Envelope<Request>>();
    let (reply_tx, reply_rx) = mpsc::channel::<Envelope<Reply>>();
    let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();
    let state = Arc::new(Mutex::new(ModelState::Loading));

    let matcher = Matcher::new(config.match_threshold);
    let renderer = BlurRenderer::new(config.blur);
    let worker_state = state.clone();
    thread::Builder::new()
      .name(name.clone())
      .spawn(move || {
        let model = match loader() {
          Ok(model) => model,
          Err(e) => {
            error!("模型加载失败: {}", e);
            *lock(&worker_state) = ModelState::Failed(e.to_string());
            let _ = ready_tx.send(Err(e.to_string()));
            return;
          }
        };
        *lock(&worker_state) = ModelState::Ready;
        let _ = ready_tx.send(Ok(()));

        serve(InferenceService::new(model, matcher, renderer), request_rx, reply_tx);
      })
      .map_err(|e| WorkerFault::ModelLoad(format!("无法创建工作线程: {}", e)))?;

    info!("等待工作线程 {} 加载模型...", name);
    match ready_rx.recv_timeout(config.load_timeout) {
      Ok(Ok(())) => {}
      Ok(Err(reason)) => return Err(WorkerFault::ModelLoad(reason)),
      Err(RecvTimeoutError::Timeout) => {
        warn!("模型加载超时 ({:?})", config.load_timeout);
        return Err(WorkerFault::Timeout(config.load_timeout));
      }
      Err(RecvTimeoutError::Disconnected) => {
        *lock(&state) = ModelState::Failed("加载模型时工作线程退出".to_string());
        return Err(WorkerFault::ModelLoad("加载模型时工作线程退出".to_string()));
      }
    }

    let canceller = WorkerCanceller {
      pending: Arc::new(Mutex::new(HashMap::new())),
      terminated: Arc::new(AtomicBool::new(false)),
      state,
    };
    let router = canceller.clone();
    thread::Builder::new()
      .name(format!("{}-router", name))
      .spawn(move || route(reply_rx, router))
      .map_err(|e| WorkerFault::ModelLoad(format!("无法创建路由线程: {}", e)))?;

    info!("工作线程 {} 已就绪", name);
    Ok(WorkerHandle {
      requests: Some(request_tx),
      canceller,
      next_id: AtomicU64::new(0),
      call_timeout: config.call_timeout,
    })
  }
}

fn serve<M: FaceModel>(
  mut service: InferenceService<M>,
  requests: Receiver<Envelope<Request>>,
  replies: Sender<Envelope<Reply>>,
) {
  for Envelope { id, body } in requests {
    debug!("工作线程处理请求 {} ({})", id, body.kind());
    let reply = service.handle(body);
    if replies.send(Envelope::new(id, reply)).is_err() {
      break;
    }
  }
  info!("工作线程退出");
}

fn route(replies: Receiver<Envelope<Reply>>, canceller: WorkerCanceller) {
  for Envelope { id, body } in replies {
    let waiter = lock(&canceller.pending).remove(&id);
    match waiter {
      Some(waiter) => {
        let _ = waiter.send(Ok(body));
      }
      None => warn!("丢弃过期的响应 {}", id),
    }
  }

  // 工作线程已经退出，未完成的调用不会再有响应
  if !canceller.terminated.load(Ordering::SeqCst) {
    error!("工作线程意外退出");
    *lock(&canceller.state) = ModelState::Failed("工作线程意外退出".to_string());
  }
  canceller.cancel();
}

/// 可跨线程使用的取消器，用于中断信号处理
#[derive(Clone)]
pub struct WorkerCanceller {
  pending: PendingTable,
  terminated: Arc<AtomicBool>,
  state: Arc<Mutex<ModelState>>,
}

impl WorkerCanceller {
  /// 拒绝所有未完成的调用，之后的提交直接返回 [`WorkerFault::Disconnected`]
  pub fn cancel(&self) {
    let mut pending = lock(&self.pending);
    self.terminated.store(true, Ordering::SeqCst);
    if !pending.is_empty() {
      warn!("取消 {} 个未完成的调用", pending.len());
    }
    for (_, waiter) in pending.drain() {
      let _ = waiter.send(Err(WorkerFault::Disconnected));
    }
  }

  pub fn is_cancelled(&self) -> bool {
    self.terminated.load(Ordering::SeqCst)
  }
}

/// 已提交但尚未完成的调用
pub struct PendingCall {
  id: CallId,
  kind: JobKind,
  receiver: Receiver<Result<Reply, WorkerFault>>,
  pending: PendingTable,
  timeout: Duration,
}

impl PendingCall {
  pub fn id(&self) -> CallId {
    self.id
  }

  pub fn kind(&self) -> JobKind {
    self.kind
  }

  pub fn wait(self) -> Result<Reply, WorkerFault> {
    match self.receiver.recv_timeout(self.timeout) {
      Ok(result) => result,
      Err(RecvTimeoutError::Timeout) => {
        lock(&self.pending).remove(&self.id);
        if let Ok(result) = self.receiver.try_recv() {
          return result;
        }
        warn!("调用 {} ({}) 超时 ({:?})", self.id, self.kind, self.timeout);
        Err(WorkerFault::Timeout(self.timeout))
      }
      Err(RecvTimeoutError::Disconnected) => Err(WorkerFault::Disconnected),
    }
  }
}

/// 运行在独立线程上的推理工作者
pub struct WorkerHandle {
  requests: Option<Sender<Envelope<Request>>>,
  canceller: WorkerCanceller,
  next_id: AtomicU64,
  call_timeout: Duration,
}

impl WorkerHandle {
  pub fn builder<F>(loader: F) -> WorkerBuilder<F> {
    WorkerBuilder::new(loader)
  }

  pub fn state(&self) -> ModelState {
    lock(&self.canceller.state).clone()
  }

  pub fn call_timeout(&self) -> Duration {
    self.call_timeout
  }

  pub fn canceller(&self) -> WorkerCanceller {
    self.canceller.clone()
  }

  pub fn is_alive(&self) -> bool {
    self.requests.is_some() && !self.canceller.is_cancelled()
  }

  /// 提交请求，不等待结果
  pub fn submit(&self, request: Request) -> Result<PendingCall, WorkerFault> {
    let requests = self.requests.as_ref().ok_or(WorkerFault::Disconnected)?;
    let id = CallId(self.next_id.fetch_add(1, Ordering::Relaxed));
    let kind = request.kind();
    let (waiter, receiver) = mpsc::channel();

    {
      let mut pending = lock(&self.canceller.pending);
      if self.canceller.is_cancelled() {
        return Err(WorkerFault::Disconnected);
      }
      pending.insert(id, waiter);
    }

    if requests.send(Envelope::new(id, request)).is_err() {
      lock(&self.canceller.pending).remove(&id);
      return Err(WorkerFault::Disconnected);
    }
    debug!("已提交请求 {} ({})", id, kind);

    Ok(PendingCall {
      id,
      kind,
      receiver,
      pending: self.canceller.pending.clone(),
      timeout: self.call_timeout,
    })
  }

  /// 关闭工作线程，未完成的调用以 [`WorkerFault::Disconnected`] 结束
  pub fn terminate(&mut self) {
    if self.requests.take().is_some() {
      info!("关闭推理工作线程");
      self.canceller.cancel();
      *lock(&self.canceller.state) = ModelState::NotLoaded;
    }
  }
}

impl FaceInference for WorkerHandle {
  fn call(&self, request: Request) -> Result<Reply, WorkerFault> {
    self.submit(request)?.wait()
  }
}

impl Drop for WorkerHandle {
  fn drop(&mut self) {
    self.terminate();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    frame::PixelPayload,
    model::{BoundingBox, DESCRIPTOR_LEN, Descriptor, Detection},
  };
  use image::RgbaImage;

  /// 宽度为 1 的图像会让模型阻塞一段时间，其余图像返回与宽度相同数量的人脸
  struct Sleepy;

  impl FaceModel for Sleepy {
    fn detect_faces(&mut self, image: &RgbaImage) -> Result<Vec<Detection>, ModelError> {
      if image.width() == 1 {
        thread::sleep(Duration::from_millis(300));
      }
      Ok(
        (0..image.width())
          .map(|i| {
            Detection::new(
              BoundingBox::new(i as f32, 0.0, 1.0, 1.0),
              0.9,
              Descriptor::new([0.0; DESCRIPTOR_LEN]),
            )
          })
          .collect(),
      )
    }
  }

  fn payload(width: u32) -> PixelPayload {
    PixelPayload::from(RgbaImage::new(width, 2))
  }

  fn spawn(timeout: Duration) -> WorkerHandle {
    WorkerHandle::builder(|| Ok::<_, ModelError>(Sleepy))
      .config(&AnonymizerConfig::default().call_timeout(timeout))
      .spawn()
      .unwrap()
  }

  #[test]
  fn stale_reply_is_not_delivered_to_the_next_call() {
    let worker = spawn(Duration::from_millis(50));
    assert_eq!(
      worker.extract_all_faces(payload(1)).unwrap_err(),
      WorkerFault::Timeout(Duration::from_millis(50))
    );

    // 第二个调用排在阻塞调用之后，放宽等待时间
    let pending = worker.submit(Request::ExtractAllFaces(payload(3))).unwrap();
    let reply = PendingCall {
      timeout: Duration::from_secs(5),
      ..pending
    }
    .wait()
    .unwrap();
    assert_eq!(reply.into_faces(JobKind::ExtractAllFaces).unwrap().len(), 3);
  }

  #[test]
  fn call_ids_are_unique() {
    let worker = spawn(Duration::from_secs(5));
    let a = worker.submit(Request::ExtractAllFaces(payload(2))).unwrap();
    let b = worker.submit(Request::ExtractAllFaces(payload(4))).unwrap();
    assert_ne!(a.id(), b.id());
    assert_eq!(b.wait().unwrap().into_faces(JobKind::ExtractAllFaces).unwrap().len(), 4);
    assert_eq!(a.wait().unwrap().into_faces(JobKind::ExtractAllFaces).unwrap().len(), 2);
  }

  #[test]
  fn cancel_rejects_pending_and_future_calls() {
    let worker = spawn(Duration::from_secs(5));
    let pending = worker.submit(Request::ExtractAllFaces(payload(1))).unwrap();
    worker.canceller().cancel();
    assert_eq!(pending.wait().unwrap_err(), WorkerFault::Disconnected);
    assert_eq!(
      worker.extract_all_faces(payload(2)).unwrap_err(),
      WorkerFault::Disconnected
    );
    assert!(!worker.is_alive());
  }

  #[test]
  fn terminate_resets_the_model_state() {
    let mut worker = spawn(Duration::from_secs(5));
    assert_eq!(worker.state(), ModelState::Ready);
    worker.terminate();
    assert_eq!(worker.state(), ModelState::NotLoaded);
    assert!(worker.submit(Request::ExtractAllFaces(payload(2))).is_err());
  }
}
