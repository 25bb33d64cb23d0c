use bitcoin::{Amount, Denomination};
use url::Url;
use crate::error::AppError;
use crate::types::CoinCode;

const SUPPORTED_SCHEMES: [&str; 3] = ["bitcoin", "litecoin", "ethereum"];

/// スキャンしたQRコードから読み取った送金先と金額
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentUri {
    pub address: String,
    pub amount: Option<String>,
}

/// `bitcoin:<address>?amount=<btc>` 形式のURI、またはアドレス単体を解析する
pub fn parse_payment_uri(uri: &str, coin: CoinCode) -> Result<PaymentUri, AppError> {
    let uri = uri.trim();
    let url = match Url::parse(uri) {
        Ok(url) => url,
        // URLでなければアドレスそのものとして扱う
        Err(_) => {
            return Ok(PaymentUri { address: uri.to_string(), amount: None });
        }
    };
    if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
        return Err(AppError::InvalidPaymentUri(format!("未対応のスキーム: {}", url.scheme())));
    }

    let address = url.path().to_string();
    if address.is_empty() {
        return Err(AppError::InvalidPaymentUri(format!("送金先アドレスがありません: {}", uri)));
    }

    let mut amount = None;
    if coin.is_bitcoin_based() {
        if let Some((_, raw)) = url.query_pairs().find(|(key, _)| key == "amount") {
            amount = match coin {
                CoinCode::Btc | CoinCode::Tbtc => Some(normalize_btc_amount(&raw)?),
                _ => Some(raw.into_owned()),
            };
        }
    }
    Ok(PaymentUri { address, amount })
}

/// 外部由来のBTC金額を検証し、BTC単位の正規形に揃える
fn normalize_btc_amount(raw: &str) -> Result<String, AppError> {
    let amount = Amount::from_str_in(raw, Denomination::Bitcoin)?;
    Ok(amount.to_string_in(Denomination::Bitcoin))
}
