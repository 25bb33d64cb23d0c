use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use crate::error::AppError;

/// バックエンドが管理するアカウントの識別子
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountCode(pub String);

impl fmt::Display for AccountCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoinCode {
    Btc,
    Tbtc,
    Rbtc,
    Ltc,
    Tltc,
    Eth,
    Sepeth,
}

impl CoinCode {
    pub fn as_str(self) -> &'static str {
        match self {
            CoinCode::Btc => "btc",
            CoinCode::Tbtc => "tbtc",
            CoinCode::Rbtc => "rbtc",
            CoinCode::Ltc => "ltc",
            CoinCode::Tltc => "tltc",
            CoinCode::Eth => "eth",
            CoinCode::Sepeth => "sepeth",
        }
    }

    pub fn is_bitcoin_based(self) -> bool {
        matches!(
            self,
            CoinCode::Btc | CoinCode::Tbtc | CoinCode::Rbtc | CoinCode::Ltc | CoinCode::Tltc
        )
    }
}

impl FromStr for CoinCode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "btc" => Ok(CoinCode::Btc),
            "tbtc" => Ok(CoinCode::Tbtc),
            "rbtc" => Ok(CoinCode::Rbtc),
            "ltc" => Ok(CoinCode::Ltc),
            "tltc" => Ok(CoinCode::Tltc),
            "eth" => Ok(CoinCode::Eth),
            "sepeth" => Ok(CoinCode::Sepeth),
            s => Err(AppError::InputValidation(format!("無効なコインコードが指定されました: {}", s))),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FeeTarget {
    Low,
    Economy,
    Normal,
    High,
    Custom,
}

/// 支払いリクエスト (SLIP-24)。中身はバックエンドにそのまま渡す
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub recipient_name: String,
    pub nonce: String,
    pub total_amount: String,
    #[serde(default)]
    pub memo: String,
}

/// バックエンドが返す金額 (表示用の10進文字列と単位)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount {
    pub amount: String,
    pub unit: String,
}

/// 成功した提案の手数料・送金額・合計
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub fee: Amount,
    pub amount: Amount,
    pub total: Amount,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    InvalidAddress,
    InvalidAmount,
    InsufficientFunds,
    AmountDust,
    FeeTooLow,
    FeesNotAvailable,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposalResult {
    Success(Proposal),
    Failure(ErrorCode),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SendOutcome {
    Sent,
    Aborted,
    #[serde(rename_all = "camelCase")]
    Failed {
        error_code: Option<String>,
        error_message: Option<String>,
    },
    /// 提案が揃っていない、または計算中のため送信しなかった
    NotReady,
}
