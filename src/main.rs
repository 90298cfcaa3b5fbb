// 该文件是 Mengmian （蒙面） 项目的一部分。
// src/main.rs - 命令行主程序
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

mod args;

use std::{
  path::PathBuf,
  sync::{Arc, Mutex},
  thread,
  time::Duration,
};

use anyhow::{Result, anyhow};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use mengmian::{
  FromUrl, FromUrlWithScheme,
  config::{AnonymizerConfig, ExampleFaces},
  input::ImageSource,
  model::TractFaceModelBuilder,
  output::{Record, output_file_name},
  pipeline::{PipelineController, PipelineMode, PipelineState},
  protocol::WorkerFault,
  worker::{WorkerCanceller, WorkerHandle},
};

fn image_source(arg: &str) -> Result<ImageSource> {
  match Url::parse(arg) {
    Ok(url) if matches!(url.scheme(), "file" | "data") => Ok(ImageSource::from_url(&url)?),
    _ => Ok(ImageSource::from(PathBuf::from(arg))),
  }
}

fn model_builder(models: &str) -> Result<TractFaceModelBuilder> {
  match Url::parse(models) {
    Ok(url) if url.scheme() == TractFaceModelBuilder::SCHEME => {
      Ok(TractFaceModelBuilder::from_url(&url)?)
    }
    Ok(url) if url.scheme().len() > 1 => Err(anyhow!("不支持的模型地址: {}", url)),
    _ => Ok(TractFaceModelBuilder::from_path(models)),
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = args::Args::parse();

  info!("模型目录: {}", args.models);
  info!("示例图像: {}", args.example.as_deref().unwrap_or("-"));
  info!("目标图像数量: {}", args.targets.len());
  info!("输出目录: {}", args.output_dir.display());
  info!("匹配阈值: {}", args.threshold);

  let config = AnonymizerConfig::default()
    .match_threshold(args.threshold)
    .call_timeout(Duration::from_secs(args.timeout_secs))
    .example_faces(if args.prominent_only {
      ExampleFaces::Prominent
    } else {
      ExampleFaces::All
    });

  let active: Arc<Mutex<Option<WorkerCanceller>>> = Arc::new(Mutex::new(None));
  let interrupt = active.clone();
  ctrlc::set_handler(move || {
    info!("收到中断信号，取消推理调用...");
    if let Ok(guard) = interrupt.lock()
      && let Some(canceller) = guard.as_ref()
    {
      canceller.cancel();
    }
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;

  let models = args.models.clone();
  let worker_config = config.clone();
  let factory = move || -> Result<WorkerHandle, WorkerFault> {
    let builder = model_builder(&models)
      .map_err(|e| WorkerFault::ModelLoad(e.to_string()))?;
    let worker = WorkerHandle::builder(move || builder.build())
      .config(&worker_config)
      .spawn()?;
    if let Ok(mut slot) = active.lock() {
      *slot = Some(worker.canceller());
    }
    Ok(worker)
  };

  let mode = if args.all_faces {
    PipelineMode::AllFaces
  } else {
    PipelineMode::MatchExample
  };
  let mut controller = PipelineController::new(factory, config)
    .mode(mode)
    .observer(|state: &PipelineState| info!("{}", state));

  if let Some(example) = &args.example {
    controller.load_example(image_source(example)?);
  }
  let targets = args
    .targets
    .iter()
    .map(|target| image_source(target))
    .collect::<Result<Vec<_>>>()?;
  controller.load_targets(targets.clone());

  let snapshot = controller.process();

  for output in &snapshot.output_images {
    let name = output_file_name(&targets[output.target_index], output.target_index);
    let path = args.output_dir.join(name);
    output.image.save(&path)?;
    if args.record {
      Record.record(&output.label, &output.image, &output.faces, &path)?;
    }
  }

  for failure in &snapshot.target_failures {
    error!("{} 处理失败: {}", failure.label, failure.error);
  }

  if let Some(e) = &snapshot.error {
    return Err(anyhow!("处理失败: {}", e));
  }

  info!(
    "处理完成! 输出 {} 张图像, 失败 {} 张",
    snapshot.output_images.len(),
    snapshot.target_failures.len()
  );
  Ok(())
}
