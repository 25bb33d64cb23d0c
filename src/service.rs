// バックエンドとの境界。提案・換算・キーストア接続・送信だけを持つ

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use crate::error::AppError;
use crate::input::TxInput;
use crate::types::{
    AccountCode, Amount, CoinCode, ErrorCode, FeeTarget, PaymentRequest, Proposal, ProposalResult,
    SendOutcome,
};

pub const DEFAULT_API_URL: &str = "http://localhost:8082";

#[async_trait]
pub trait ProposalService: Send + Sync {
    /// 入力が揃った TxInput から手数料・合計を見積もる。順序はクライアント側で扱う
    async fn propose_transaction(
        &self,
        account: &AccountCode,
        input: &TxInput,
    ) -> Result<ProposalResult, AppError>;

    /// `Ok(None)` はバックエンドが換算できなかったことを表す
    async fn convert_to_fiat(
        &self,
        amount: &str,
        coin: CoinCode,
        fiat_unit: &str,
    ) -> Result<Option<String>, AppError>;

    async fn convert_from_fiat(
        &self,
        fiat_amount: &str,
        coin: CoinCode,
        fiat_unit: &str,
    ) -> Result<Option<String>, AppError>;

    /// 署名デバイスとの接続を確立する。`Ok(false)` は利用者が接続を完了しなかったことを表す
    async fn connect_keystore(&self, account: &AccountCode) -> Result<bool, AppError>;

    async fn send_tx(&self, account: &AccountCode, note: &str) -> Result<SendOutcome, AppError>;
}

/// ローカルHTTPで公開されているウォレットバックエンド
pub struct HttpProposalService {
    client: Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct TxProposalArgs<'a> {
    address: &'a str,
    amount: &'a str,
    fee_target: FeeTarget,
    custom_fee: &'a str,
    send_all: &'static str,
    #[serde(rename = "selectedUTXOs")]
    selected_utxos: Vec<&'a str>,
    payment_request: Option<&'a PaymentRequest>,
}

impl<'a> TxProposalArgs<'a> {
    fn from_input(input: &'a TxInput) -> Result<Self, AppError> {
        let fee_target = input.fee_target.ok_or_else(|| {
            AppError::InputValidation("手数料ターゲットが未設定です".to_string())
        })?;
        let address = input.address.as_deref().ok_or_else(|| {
            AppError::InputValidation("送金先アドレスが未設定です".to_string())
        })?;
        Ok(Self {
            address,
            amount: input.amount.as_deref().unwrap_or_default(),
            fee_target,
            custom_fee: input.custom_fee.as_deref().unwrap_or_default(),
            send_all: if input.send_all { "yes" } else { "no" },
            selected_utxos: input.selected_utxos.iter().map(String::as_str).collect(),
            payment_request: input.payment_request.as_ref(),
        })
    }
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum ApiResponse<T> {
    Failed { error: String },
    Ok(T),
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct TxProposalResponse {
    success: bool,
    amount: Option<Amount>,
    fee: Option<Amount>,
    total: Option<Amount>,
    error_code: Option<ErrorCode>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ToFiatResponse {
    success: bool,
    fiat_amount: Option<String>,
}

#[derive(Deserialize, Debug)]
struct FromFiatResponse {
    success: bool,
    amount: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ConnectKeystoreResponse {
    success: bool,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SendTxResponse {
    success: bool,
    #[serde(default)]
    aborted: bool,
    error_code: Option<String>,
    error_message: Option<String>,
}

impl TxProposalResponse {
    fn into_result(self, endpoint: &str) -> Result<ProposalResult, AppError> {
        if !self.success {
            let code = self.error_code.unwrap_or(ErrorCode::Unknown);
            return Ok(ProposalResult::Failure(code));
        }
        match (self.fee, self.amount, self.total) {
            (Some(fee), Some(amount), Some(total)) => {
                Ok(ProposalResult::Success(Proposal { fee, amount, total }))
            }
            _ => Err(AppError::UnexpectedResponse {
                endpoint: endpoint.to_string(),
                detail: "成功応答に fee/amount/total が含まれていません".to_string(),
            }),
        }
    }
}

impl SendTxResponse {
    fn into_outcome(self) -> SendOutcome {
        if self.success {
            SendOutcome::Sent
        } else if self.aborted {
            SendOutcome::Aborted
        } else {
            SendOutcome::Failed {
                error_code: self.error_code,
                error_message: self.error_message,
            }
        }
    }
}

impl HttpProposalService {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, AppError> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/api/{}", self.base_url, endpoint)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => {
                request.header(reqwest::header::AUTHORIZATION, format!("Basic {}", token))
            }
            None => request,
        }
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        request: RequestBuilder,
    ) -> Result<T, AppError> {
        log::debug!("バックエンド呼び出し: {}", endpoint);
        let response = self.authorize(request).send().await.map_err(|e| {
            log::error!("バックエンドへの接続に失敗しました ({}): {}", endpoint, e);
            AppError::Http(e)
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Backend {
                endpoint: endpoint.to_string(),
                message: format!("HTTPステータス {}", status),
            });
        }
        match response.json::<ApiResponse<T>>().await? {
            ApiResponse::Ok(body) => Ok(body),
            ApiResponse::Failed { error } => {
                log::warn!("バックエンドがエラーを返しました ({}): {}", endpoint, error);
                Err(AppError::Backend { endpoint: endpoint.to_string(), message: error })
            }
        }
    }
}

#[async_trait]
impl ProposalService for HttpProposalService {
    async fn propose_transaction(
        &self,
        account: &AccountCode,
        input: &TxInput,
    ) -> Result<ProposalResult, AppError> {
        let endpoint = format!("account/{}/tx-proposal", account);
        let args = TxProposalArgs::from_input(input)?;
        let request = self.client.post(self.url(&endpoint)).json(&args);
        let response: TxProposalResponse = self.execute(&endpoint, request).await?;
        response.into_result(&endpoint)
    }

    async fn convert_to_fiat(
        &self,
        amount: &str,
        coin: CoinCode,
        fiat_unit: &str,
    ) -> Result<Option<String>, AppError> {
        let endpoint = "coins/convert-to-plain-fiat";
        let request = self
            .client
            .get(self.url(endpoint))
            .query(&[("from", coin.as_str()), ("to", fiat_unit), ("amount", amount)]);
        let response: ToFiatResponse = self.execute(endpoint, request).await?;
        Ok(response.fiat_amount.filter(|_| response.success))
    }

    async fn convert_from_fiat(
        &self,
        fiat_amount: &str,
        coin: CoinCode,
        fiat_unit: &str,
    ) -> Result<Option<String>, AppError> {
        let endpoint = "coins/convert-from-fiat";
        let request = self
            .client
            .get(self.url(endpoint))
            .query(&[("from", fiat_unit), ("to", coin.as_str()), ("amount", fiat_amount)]);
        let response: FromFiatResponse = self.execute(endpoint, request).await?;
        Ok(response.amount.filter(|_| response.success))
    }

    async fn connect_keystore(&self, account: &AccountCode) -> Result<bool, AppError> {
        let endpoint = format!("account/{}/connect-keystore", account);
        let request = self.client.post(self.url(&endpoint));
        let response: ConnectKeystoreResponse = self.execute(&endpoint, request).await?;
        Ok(response.success)
    }

    async fn send_tx(&self, account: &AccountCode, note: &str) -> Result<SendOutcome, AppError> {
        let endpoint = format!("account/{}/sendtx", account);
        let request = self.client.post(self.url(&endpoint)).json(&note);
        let response: SendTxResponse = self.execute(&endpoint, request).await?;
        Ok(response.into_outcome())
    }
}
