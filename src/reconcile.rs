use std::collections::BTreeMap;
use serde::Serialize;
use crate::types::{ErrorCode, Proposal, ProposalResult};

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorField {
    Address,
    Amount,
    Fee,
    General,
}

/// フィールド名からエラーメッセージへの対応
pub type ValidationErrors = BTreeMap<ErrorField, String>;

impl ErrorCode {
    pub fn field(self) -> ErrorField {
        match self {
            ErrorCode::InvalidAddress => ErrorField::Address,
            ErrorCode::InvalidAmount | ErrorCode::InsufficientFunds | ErrorCode::AmountDust => {
                ErrorField::Amount
            }
            ErrorCode::FeeTooLow | ErrorCode::FeesNotAvailable => ErrorField::Fee,
            ErrorCode::Unknown => ErrorField::General,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            ErrorCode::InvalidAddress => "無効な送金先アドレスです",
            ErrorCode::InvalidAmount => "無効な金額です",
            ErrorCode::InsufficientFunds => "残高が不足しています",
            ErrorCode::AmountDust => "金額が少なすぎます (ダスト)",
            ErrorCode::FeeTooLow => "手数料が低すぎます",
            ErrorCode::FeesNotAvailable => "手数料の見積もりを取得できません",
            ErrorCode::Unknown => "トランザクションを作成できません",
        }
    }

    /// このエラーと直前の提案を並べて表示してよいか
    pub fn keeps_proposal(self) -> bool {
        matches!(self, ErrorCode::InvalidAddress)
    }
}

pub fn validation_errors(code: ErrorCode) -> ValidationErrors {
    BTreeMap::from([(code.field(), code.message().to_string())])
}

/// 最新の提案とそのエラー
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProposalState {
    proposal: Option<Proposal>,
    errors: ValidationErrors,
}

impl ProposalState {
    pub fn proposal(&self) -> Option<&Proposal> {
        self.proposal.as_ref()
    }

    pub fn errors(&self) -> &ValidationErrors {
        &self.errors
    }

    pub fn clear(&mut self) {
        self.proposal = None;
        self.errors.clear();
    }

    /// 破棄判定を通過した結果だけを渡すこと
    pub fn apply(&mut self, result: ProposalResult) {
        match result {
            ProposalResult::Success(proposal) => {
                self.errors.clear();
                self.proposal = Some(proposal);
            }
            ProposalResult::Failure(code) => {
                let errors = validation_errors(code);
                let targets_amount = errors.contains_key(&ErrorField::Amount);
                if errors.is_empty() || targets_amount || !code.keeps_proposal() {
                    self.proposal = None;
                }
                log::debug!("提案がバックエンドに拒否されました: {:?}", code);
                self.errors = errors;
            }
        }
    }
}
