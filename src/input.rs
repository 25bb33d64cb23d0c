use std::collections::BTreeSet;
use serde::{Deserialize, Serialize};
use crate::types::{FeeTarget, PaymentRequest};

/// 送金フォームの入力値。各フィールドは部分的に埋まっている状態を許す
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TxInput {
    pub address: Option<String>,
    /// ネイティブ単位の10進文字列
    pub amount: Option<String>,
    pub send_all: bool,
    pub fee_target: Option<FeeTarget>,
    pub custom_fee: Option<String>,
    /// 空なら自動コイン選択
    #[serde(rename = "selectedUTXOs")]
    pub selected_utxos: BTreeSet<String>,
    pub payment_request: Option<PaymentRequest>,
}

/// フィールド1つ分の更新
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "camelCase")]
pub enum FieldUpdate {
    Address(String),
    Amount(String),
    SendAll(bool),
    FeeTarget(Option<FeeTarget>),
    CustomFee(String),
    #[serde(rename = "selectedUTXOs")]
    SelectedUtxos(BTreeSet<String>),
    PaymentRequest(Option<PaymentRequest>),
}

impl FieldUpdate {
    pub fn name(&self) -> &'static str {
        match self {
            FieldUpdate::Address(_) => "address",
            FieldUpdate::Amount(_) => "amount",
            FieldUpdate::SendAll(_) => "sendAll",
            FieldUpdate::FeeTarget(_) => "feeTarget",
            FieldUpdate::CustomFee(_) => "customFee",
            FieldUpdate::SelectedUtxos(_) => "selectedUTXOs",
            FieldUpdate::PaymentRequest(_) => "paymentRequest",
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

fn is_filled(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.is_empty())
}

impl TxInput {
    /// 指定フィールドだけを置き換える。他のフィールドには触れない
    pub fn update(&mut self, update: FieldUpdate) {
        match update {
            FieldUpdate::Address(address) => self.address = non_empty(address),
            FieldUpdate::Amount(amount) => self.amount = non_empty(amount),
            FieldUpdate::SendAll(send_all) => self.send_all = send_all,
            FieldUpdate::FeeTarget(fee_target) => self.fee_target = fee_target,
            FieldUpdate::CustomFee(custom_fee) => self.custom_fee = non_empty(custom_fee),
            FieldUpdate::SelectedUtxos(utxos) => self.selected_utxos = utxos,
            FieldUpdate::PaymentRequest(request) => self.payment_request = request,
        }
    }

    /// バックエンドに提案を依頼できるだけの入力が揃っているか
    pub fn is_complete(&self) -> bool {
        let Some(fee_target) = self.fee_target else {
            return false;
        };
        is_filled(&self.address)
            && (self.send_all || is_filled(&self.amount))
            && (fee_target != FeeTarget::Custom || is_filled(&self.custom_fee))
    }
}
