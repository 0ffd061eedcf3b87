//! ログ出力の初期化

use tracing::Level;

/// fmtサブスクライバを登録する
///
/// 環境変数は参照しない。二重初期化はエラーにせず無視する。
pub fn init_logging() {
    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_max_level(Level::INFO)
        .with_target(false)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("ログは既に初期化されています");
    }
}
