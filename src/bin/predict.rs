//! 保存済みモデルでテストアーカイブを分類し、結果CSVを書き出す

use action_recognition_lib::logging::init_logging;
use action_recognition_lib::model::AppConfig;
use action_recognition_lib::pipeline::predict_from_bundle;
use action_recognition_lib::types::action_name;
use anyhow::Context;
use std::path::PathBuf;

fn main() -> anyhow::Result<()> {
    init_logging();

    let args: Vec<String> = std::env::args().collect();
    let config = AppConfig::load_or_default();

    let model_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => PathBuf::from(
            config
                .paths
                .model_output_path
                .clone()
                .context("Usage: predict <model.tar.gz> [test_archive] [result.csv]")?,
        ),
    };
    let test_path = PathBuf::from(args.get(2).unwrap_or(&config.paths.test_dataset_path));
    let result_path = PathBuf::from(args.get(3).unwrap_or(&config.paths.result_path));

    println!(
        "Predict:\n  model: {}\n  test: {}\n  output: {}",
        model_path.display(),
        test_path.display(),
        result_path.display()
    );

    let table = predict_from_bundle(&model_path, &test_path, &result_path)?;

    let mut counts = [0usize; action_recognition_lib::types::NUM_CLASSES];
    for record in table.records() {
        if let Some(count) = counts.get_mut(record.predictions) {
            *count += 1;
        }
    }
    println!("\n=== 予測クラスの内訳 ===");
    for (class, count) in counts.iter().enumerate() {
        if *count > 0 {
            println!("  {:>2} {:<20} {}", class, action_name(class).unwrap_or("?"), count);
        }
    }
    println!("合計: {} 枚", table.len());
    Ok(())
}
