//! 保存済みモデルバンドルのメタデータを表示する

use action_recognition_lib::logging::init_logging;
use action_recognition_lib::model::{print_metadata_info, AppConfig, InferenceConfig};
use anyhow::Context;
use std::path::PathBuf;

fn main() -> anyhow::Result<()> {
    init_logging();

    // コマンドライン引数を取得
    let args: Vec<String> = std::env::args().collect();
    let model_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let config = AppConfig::load_or_default();
            let path = config
                .paths
                .model_output_path
                .context("Usage: inspect_model <model.tar.gz>")?;
            PathBuf::from(path)
        }
    };

    let config = InferenceConfig::load_from_model(&model_path)
        .with_context(|| format!("Failed to read {}", model_path.display()))?;
    let metadata = action_recognition_lib::model::load_metadata(&model_path)?;

    print_metadata_info(&metadata);
    config.print_info();
    Ok(())
}
