use std::fs::{self, File};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use clap::Parser;

mod config;
mod error;
mod types;
mod cli;
mod input;
mod requester;
mod reconcile;
mod fiat;
mod payment_uri;
mod service;
mod session;

use config::ScenarioConfig;
use error::AppError;
use cli::{CliArgs, parse_coin};
use service::HttpProposalService;
use session::SendSession;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), AppError> {
    env_logger::init();

    let args = CliArgs::parse();
    // APIトークンはログに出さない
    log::info!(
        "アプリケーションを開始します。入力: {:?}, 出力: {:?}, バックエンド: {}",
        args.input_file, args.output_file, args.api_url
    );

    let input_file_content = fs::read_to_string(&args.input_file).map_err(|e| {
        log::error!("入力ファイルの読み込みに失敗しました: {:?}", args.input_file);
        AppError::Io(e)
    })?;

    let scenario: ScenarioConfig = serde_json::from_str(&input_file_content).map_err(|e| {
        log::error!("入力JSONのパースに失敗しました。");
        AppError::JsonParse {
            file_path: args.input_file.clone(),
            source: e,
        }
    })?;
    log::debug!("シナリオファイルのパース成功: {:?}", scenario);

    let coin = match &args.coin {
        Some(coin) => parse_coin(coin)?,
        None => scenario.coin,
    };
    log::info!("使用するコイン: {:?}, 法定通貨: {}", coin, scenario.fiat_unit);

    let service = Arc::new(HttpProposalService::new(&args.api_url, args.api_token.clone())?);
    let (mut handle, session_task) = SendSession::spawn(service, scenario.settings(coin));

    for (index, step) in scenario.steps.into_iter().enumerate() {
        if step.wait_ms > 0 {
            tokio::time::sleep(Duration::from_millis(step.wait_ms)).await;
        }
        if step.settle {
            handle.settle().await?;
        }
        log::debug!("ステップ {}: {:?}", index, step.action);
        handle.dispatch(step.action.into())?;
        log::trace!("ステップ {} 実行直後の状態: {:?}", index, handle.view());
    }

    let view = handle.settle().await?;
    log::info!("送金画面の状態が確定しました。");

    let serialized_view = serde_json::to_string_pretty(&view)?;
    println!("{}", serialized_view);

    let mut output_file = File::create(&args.output_file).map_err(|e| {
        log::error!("出力ファイルの作成に失敗しました: {:?}", args.output_file);
        AppError::Io(e)
    })?;
    output_file.write_all(serialized_view.as_bytes()).map_err(|e| {
        log::error!("出力ファイルへの書き込みに失敗しました。");
        AppError::Io(e)
    })?;
    log::info!("送金画面の状態を {:?} に保存しました。", args.output_file);

    drop(handle);
    if let Err(e) = session_task.await {
        log::error!("送金セッションが異常終了しました: {}", e);
    }

    log::info!("処理が正常に完了しました。");
    Ok(())
}
