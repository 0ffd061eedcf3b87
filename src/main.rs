use action_recognition_lib::logging::init_logging;
use action_recognition_lib::model::AppConfig;
use action_recognition_lib::pipeline;

fn main() -> anyhow::Result<()> {
    init_logging();

    let config = AppConfig::load_or_default();
    config.display();

    let summary = pipeline::run(&config)?;

    tracing::info!(
        "完了: 学習 {} 枚 / 検証 {} 枚 / テスト {} 枚, {} エポック ({})",
        summary.train_samples,
        summary.validation_samples,
        summary.test_samples,
        summary.report.epochs_run(),
        summary.report.stop_reason
    );
    tracing::info!("予測結果: {}", summary.result_path.display());
    if let Some(path) = &summary.model_path {
        tracing::info!("モデル: {}", path.display());
    }
    Ok(())
}
