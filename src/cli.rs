use clap::Parser;
use std::path::PathBuf;
use crate::error::AppError;
use crate::service::DEFAULT_API_URL;
use crate::types::CoinCode;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct CliArgs {
    /// 送金画面での操作手順を記述したJSONファイルへのパス
    #[clap(short, long, value_parser)]
    pub input_file: PathBuf,

    /// 最終的な送金画面の状態 (JSON) を保存するファイルへのパス
    #[clap(short, long, value_parser)]
    pub output_file: PathBuf,

    /// ウォレットバックエンドのURL
    #[clap(short, long, value_parser, default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// バックエンドのAPIトークン
    #[clap(short = 't', long, value_parser)]
    pub api_token: Option<String>,

    /// 使用するコイン ("btc", "tbtc", "ltc", "eth" など)。省略時はシナリオの値
    #[clap(short, long, value_parser)]
    pub coin: Option<String>,
}

pub fn parse_coin(coin_str: &str) -> Result<CoinCode, AppError> {
    coin_str.parse()
}
