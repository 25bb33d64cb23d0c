use std::time::Duration;
use tokio::time::Instant;
use crate::input::TxInput;
use crate::types::AccountCode;

/// 提案リクエストの同一性。値が同じ入力でも発行ごとに別のトークンになる
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct RequestToken(u64);

/// 発火時点の入力のスナップショット
#[derive(Debug, Clone)]
pub struct ProposalRequest {
    pub token: RequestToken,
    pub account: AccountCode,
    pub input: TxInput,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// 入力不足。表示中の提案とエラーは即座に消す
    Cleared,
    Scheduled(Instant),
}

/// 入力変更の連続を、静止期間後の1回のバックエンド呼び出しにまとめる
#[derive(Debug)]
pub struct ProposalRequester {
    quiet_period: Duration,
    deadline: Option<Instant>,
    next_token: u64,
    last_submitted: Option<RequestToken>,
}

impl ProposalRequester {
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            deadline: None,
            next_token: 0,
            last_submitted: None,
        }
    }

    /// 入力が変わるたびに呼ぶ。予約中・送信中のリクエストはどちらも無効になる
    pub fn on_input_changed(&mut self, complete: bool, now: Instant) -> Schedule {
        self.deadline = None;
        if let Some(token) = self.last_submitted.take() {
            log::debug!("送信中の提案リクエスト {:?} を破棄扱いにします。", token);
        }
        if !complete {
            return Schedule::Cleared;
        }
        let deadline = now + self.quiet_period;
        self.deadline = Some(deadline);
        Schedule::Scheduled(deadline)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// 静止期間が明けたときに呼ぶ。最後に送信したリクエストとして記録する
    pub fn fire(&mut self, account: &AccountCode, input: &TxInput) -> ProposalRequest {
        self.deadline = None;
        self.next_token += 1;
        let token = RequestToken(self.next_token);
        self.last_submitted = Some(token);
        ProposalRequest {
            token,
            account: account.clone(),
            input: input.clone(),
        }
    }

    pub fn is_current(&self, token: RequestToken) -> bool {
        self.last_submitted == Some(token)
    }

    /// 応答が届いたリクエストを片付ける。最新のものでなければ false
    pub fn settle(&mut self, token: RequestToken) -> bool {
        if self.is_current(token) {
            self.last_submitted = None;
            true
        } else {
            false
        }
    }

    pub fn is_updating(&self) -> bool {
        self.last_submitted.is_some()
    }

    pub fn is_debouncing(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn reset(&mut self) {
        self.deadline = None;
        self.last_submitted = None;
    }
}
