//! 予測結果のCSV出力
//!
//! ファイル名の数字部分（`img_42.png` → 42）で並べ替え、
//! 先頭に無名の連番列を付けた `,img,predictions` 形式で書き出します。

use std::path::Path;

use csv::{ReaderBuilder, WriterBuilder};

use crate::error::{Error, Result};

/// ファイル名から並び順キーを取り出す
///
/// `_` で分割した2番目の要素を `.` で分割し、その先頭を整数として読む。
pub fn order_key(name: &str) -> Result<u64> {
    name.split('_')
        .nth(1)
        .and_then(|rest| rest.split('.').next())
        .and_then(|token| token.parse::<u64>().ok())
        .ok_or_else(|| Error::FilenameFormat(name.to_string()))
}

/// 1枚分の予測
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictionRecord {
    pub img: String,
    pub predictions: usize,
    pub order: u64,
}

/// 並び順キーの昇順に並んだ予測結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultTable {
    records: Vec<PredictionRecord>,
}

impl ResultTable {
    /// ファイル名と予測クラスから表を作る
    ///
    /// 件数が一致しない場合や並び順キーが読めない名前がある場合はエラー。
    pub fn from_predictions(names: &[String], classes: &[usize]) -> Result<Self> {
        if names.len() != classes.len() {
            return Err(Error::Shape(format!(
                "{} file names but {} predictions",
                names.len(),
                classes.len()
            )));
        }

        let mut records = names
            .iter()
            .zip(classes)
            .map(|(name, &class)| {
                Ok(PredictionRecord {
                    img: name.clone(),
                    predictions: class,
                    order: order_key(name)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        records.sort_by_key(|r| r.order);

        Ok(Self { records })
    }

    pub fn records(&self) -> &[PredictionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// CSVとして書き出す
    ///
    /// 一時ファイルに書いてからリネームするので、失敗時に出力ファイルは残らない。
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);

        let result = self.write_records(&tmp_path);
        if result.is_err() {
            let _ = std::fs::remove_file(&tmp_path);
            return result;
        }
        std::fs::rename(&tmp_path, path)?;

        tracing::info!("予測結果を書き出しました: {} ({} 件)", path.display(), self.len());
        Ok(())
    }

    fn write_records(&self, path: &Path) -> Result<()> {
        let mut writer = WriterBuilder::new().from_path(path)?;
        writer.write_record(["", "img", "predictions"])?;
        for (index, record) in self.records.iter().enumerate() {
            writer.write_record([
                index.to_string(),
                record.img.clone(),
                record.predictions.to_string(),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }

    /// 書き出したCSVを読み戻す
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;

        let mut records = Vec::new();
        for result in reader.records() {
            let record = result?;
            let img = record
                .get(1)
                .ok_or_else(|| Error::Csv("missing img column".to_string()))?
                .to_string();
            let predictions = record
                .get(2)
                .ok_or_else(|| Error::Csv("missing predictions column".to_string()))?
                .parse::<usize>()
                .map_err(|e| Error::Csv(format!("invalid prediction: {}", e)))?;
            let order = order_key(&img)?;
            records.push(PredictionRecord { img, predictions, order });
        }

        Ok(Self { records })
    }
}
