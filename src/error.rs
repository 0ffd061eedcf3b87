//! ライブラリ共通のエラー型

use thiserror::Error;

/// 学習・推論ワークフローのエラー
///
/// どのエラーも回復せずにトップレベルまで伝播させる。
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// アーカイブや .npy の形式が不正
    #[error("Malformed archive: {0}")]
    Archive(String),

    /// アーカイブに必要なキーが無い
    #[error("Archive {path} has no `{key}` entry")]
    MissingKey { path: String, key: String },

    /// 配列の形状が期待と異なる
    #[error("Shape mismatch: {0}")]
    Shape(String),

    /// one-hotでないラベル行
    #[error("Label row {row} is not one-hot: {detail}")]
    InvalidLabel { row: usize, detail: String },

    #[error("Configuration error: {0}")]
    Config(String),

    /// ファイル名から並び順を取り出せない
    #[error("Cannot extract order key from file name `{0}`")]
    FilenameFormat(String),

    #[error("Model record error: {0}")]
    Record(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Image encoding error: {0}")]
    Image(String),

    /// ビルドに含まれていないバックエンドが指定された
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("CSV error: {0}")]
    Csv(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Image(err.to_string())
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::Csv(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::FilenameFormat("nodigits.png".to_string());
        assert_eq!(
            err.to_string(),
            "Cannot extract order key from file name `nodigits.png`"
        );

        let err = Error::MissingKey {
            path: "train.tar".to_string(),
            key: "target".to_string(),
        };
        assert_eq!(err.to_string(), "Archive train.tar has no `target` entry");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
