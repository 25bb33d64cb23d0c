use std::path::PathBuf;
use std::time::Duration;
use bitcoin::amount::ParseAmountError as BitcoinAmountError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/Oエラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSONパースエラー ファイル: {file_path:?}, 詳細: {source}")]
    JsonParse {
        file_path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("JSONシリアライズエラー: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    #[error("HTTP通信エラー: {0}")]
    Http(#[from] reqwest::Error),

    #[error("バックエンドエラー (エンドポイント {endpoint}): {message}")]
    Backend {
        endpoint: String,
        message: String,
    },

    #[error("バックエンドの応答が不正です (エンドポイント {endpoint}): {detail}")]
    UnexpectedResponse {
        endpoint: String,
        detail: String,
    },

    #[error("バックエンド呼び出しがタイムアウトしました ({0:?})")]
    Timeout(Duration),

    #[error("Bitcoin金額の解析エラー: {0}")]
    BitcoinAmount(#[from] BitcoinAmountError),

    #[error("無効な支払いURI: {0}")]
    InvalidPaymentUri(String),

    #[error("入力検証エラー: {0}")]
    InputValidation(String),

    #[error("送金セッションは既に終了しています")]
    SessionClosed,
}
