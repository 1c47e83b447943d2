// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 实时视频标注 - 命令行外壳
/// Real-time video annotation shell
///
/// 主程序入口 - 直接运行: cargo run --bin annotate -- --source synthetic:300
///
/// 标准输入命令: open <locator> | pause | resume | close | stats | quit
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, Sender, TryRecvError};
use yolo_annotator::{
    Annotator, ControlError, DisplaySink, EndReason, Frame, PipelineConfig, PlaybackController,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// 实时标注程序
#[derive(Parser, Debug)]
#[command(author, version, about = "YOLO 实时视频标注", long_about = None)]
struct Args {
    /// 启动时打开的输入源 (文件/目录/rtsp://.../camera:0/synthetic:N)
    #[arg(short, long)]
    source: Option<String>,

    /// 检测模型 (.onnx 路径, 或 stub)
    #[arg(short, long, default_value = "stub")]
    model: String,

    /// 配置文件 (不存在时写入默认配置)
    #[arg(short, long, default_value = "pipeline.json")]
    config: PathBuf,

    /// 标签字体 (覆盖配置文件)
    #[arg(long)]
    font: Option<PathBuf>,

    /// 把标注后的帧保存到该目录
    #[arg(long)]
    save_dir: Option<PathBuf>,
}

/// 日志显示端: 统计帧率, 可选保存帧
struct LoggingSink {
    save_dir: Option<PathBuf>,
    count: u64,
    total: u64,
    last: Instant,
}

impl LoggingSink {
    fn new(save_dir: Option<PathBuf>) -> Self {
        Self {
            save_dir,
            count: 0,
            total: 0,
            last: Instant::now(),
        }
    }
}

impl DisplaySink for LoggingSink {
    fn on_frame(&mut self, frame: Frame) {
        self.count += 1;
        self.total += 1;

        if let Some(dir) = &self.save_dir {
            let path = dir.join(format!("{:06}.jpg", frame.index()));
            if let Err(e) = frame.image().save(&path) {
                log::warn!("⚠️ 保存帧失败 {}: {}", path.display(), e);
            }
        }

        if self.last.elapsed().as_secs() >= 1 {
            let fps = self.count as f64 / self.last.elapsed().as_secs_f64();
            log::info!(
                "🖥️ 显示: {:.1}fps | 帧#{} {}x{}",
                fps,
                frame.index(),
                frame.width(),
                frame.height()
            );
            self.count = 0;
            self.last = Instant::now();
        }
    }

    fn on_stream_ended(&mut self, reason: EndReason) {
        log::info!("🏁 播放结束: {:?} (共显示{}帧)", reason, self.total);
        self.total = 0;
    }
}

fn report(command: &str, result: Result<(), ControlError>) {
    match result {
        Ok(()) => log::info!("✅ {}", command),
        Err(e) => log::warn!("⚠️ {}: {}", command, e),
    }
}

/// 命令线程: 读取标准输入并驱动控制器
fn command_loop(controller: Arc<PlaybackController>, model: String, quit: Sender<()>) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else {
            break;
        };
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("open"), Some(locator)) => report("open", controller.open(locator, &model)),
            (Some("pause"), _) => report("pause", controller.pause()),
            (Some("resume"), _) => report("resume", controller.resume()),
            (Some("close"), _) => report("close", controller.close()),
            (Some("stats"), _) => {
                log::info!("📊 {:?} | {:?}", controller.state(), controller.stats())
            }
            (Some("quit"), _) | (Some("exit"), _) => break,
            (None, _) => {}
            (Some(other), _) => {
                log::warn!("⚠️ 未知命令: {} (open <locator> | pause | resume | close | stats | quit)", other)
            }
        }
    }
    let _ = quit.send(());
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = PipelineConfig::load(&args.config);
    if let Some(font) = args.font {
        config.annotation.font_path = Some(font);
    }
    config.log_summary();

    if let Some(dir) = &args.save_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("无法创建输出目录: {}", dir.display()))?;
    }

    let annotator = Annotator::from_config(&config.annotation)?;
    let (controller, mut frames) = PlaybackController::new(config, annotator);
    let controller = Arc::new(controller);

    if let Some(source) = &args.source {
        controller
            .open(source, &args.model)
            .with_context(|| format!("打开失败: {}", source))?;
    }

    let (quit_tx, quit_rx) = bounded(1);
    {
        let controller = controller.clone();
        let model = args.model.clone();
        std::thread::Builder::new()
            .name("command".to_string())
            .spawn(move || command_loop(controller, model, quit_tx))?;
    }

    let mut sink = LoggingSink::new(args.save_dir);
    while let Err(TryRecvError::Empty) = quit_rx.try_recv() {
        frames.dispatch(&mut sink, Duration::from_millis(100));
    }

    let _ = controller.close();
    frames.pump(&mut sink);
    log::info!("👋 退出");
    Ok(())
}
