use clap::Parser;
use small_flow::utils::error::{ErrorSeverity, FlowError};
use small_flow::utils::{logger, validation::is_remote, validation::Validate};
use small_flow::{
    CliConfig, FileSink, FileSource, FlowConfig, HttpSource, Pipeline, ProgressStage,
    ProgressUpdate, Stage,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    let config = match cli.resolve() {
        Ok(config) => config,
        Err(e) => {
            logger::init_cli_logger(cli.verbose);
            fail(&e);
        }
    };

    // 初始化日誌
    if config.logging.json {
        logger::init_json_logger();
    } else {
        logger::init_cli_logger(config.logging.verbose);
    }

    tracing::info!("Starting small-flow CLI");
    tracing::debug!("Resolved config: {:?}", config);

    // 驗證配置
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        fail(&e);
    }

    match transfer(&config).await {
        Ok(summary) => {
            tracing::info!(
                "✅ Transfer completed: {} in {}s",
                format_bytes(summary.transferred as f64),
                summary.runtime
            );
            if let Some(output) = &config.transfer.output {
                tracing::info!("📁 Output saved to: {}", output);
            }
            if config.logging.json {
                println!("{}", serde_json::to_string(&summary)?);
            } else {
                println!("✅ {} transferred", format_bytes(summary.transferred as f64));
            }
        }
        Err(e) => {
            tracing::error!(
                "❌ Transfer failed: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            fail(&e);
        }
    }

    Ok(())
}

async fn transfer(config: &FlowConfig) -> Result<ProgressUpdate, Arc<FlowError>> {
    let source_path = config.source().map_err(Arc::new)?;

    let source: Box<dyn Stage> = if is_remote(source_path) {
        tracing::info!("🌐 Downloading {}", source_path);
        Box::new(HttpSource::get(&reqwest::Client::new(), source_path))
    } else {
        tracing::info!("📄 Reading {}", source_path);
        Box::new(FileSource::open(source_path).await.map_err(Arc::new)?)
    };

    let progress = ProgressStage::new(config.progress.clone()).on_progress(log_progress);
    let handle = progress.handle();

    let mut pipeline = Pipeline::new()
        .capacity(config.transfer.capacity)
        .boxed_stage(source)
        .stage(progress);
    if let Some(output) = &config.transfer.output {
        pipeline = pipeline.stage(FileSink::create(output));
    }

    pipeline.run().await?;
    Ok(handle.progress())
}

fn log_progress(update: &ProgressUpdate) {
    if update.length > 0 {
        tracing::info!(
            "📊 {:>5.1}% {} / {} at {}/s, ETA {}s",
            update.percentage,
            format_bytes(update.transferred as f64),
            format_bytes(update.length as f64),
            format_bytes(update.speed),
            update.eta
        );
    } else {
        tracing::info!(
            "📊 {} at {}/s",
            format_bytes(update.transferred as f64),
            format_bytes(update.speed)
        );
    }
}

fn format_bytes(bytes: f64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{:.0} {}", value, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// 輸出用戶友好的錯誤信息，並依嚴重程度決定退出碼
fn fail(e: &FlowError) -> ! {
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 建議: {}", e.recovery_suggestion());

    let exit_code = match e.severity() {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2, // 可重試 (網路)
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    };
    std::process::exit(exit_code);
}
