// 入力・提案・エラーは1つのタスクだけが所有し、イベントを1つずつ処理する

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use crate::error::AppError;
use crate::fiat::{
    AmountSynchronizer, ConversionRequest, ConversionToken, Converted, Direction, FiatEdit,
};
use crate::input::{FieldUpdate, TxInput};
use crate::payment_uri::parse_payment_uri;
use crate::reconcile::{ErrorField, ProposalState, ValidationErrors};
use crate::requester::{ProposalRequester, RequestToken, Schedule};
use crate::service::ProposalService;
use crate::types::{AccountCode, CoinCode, Proposal, ProposalResult, SendOutcome};

pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(400);
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub account: AccountCode,
    pub coin: CoinCode,
    pub fiat_unit: String,
    /// 最後の入力からバックエンドに問い合わせるまでの静止期間
    pub quiet_period: Duration,
    /// 提案・換算呼び出しの上限時間
    pub call_timeout: Duration,
}

impl SessionSettings {
    pub fn new(account: AccountCode, coin: CoinCode, fiat_unit: &str) -> Self {
        Self {
            account,
            coin,
            fiat_unit: fiat_unit.to_string(),
            quiet_period: DEFAULT_QUIET_PERIOD,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Update(FieldUpdate),
    EditFiat(String),
    ScanPaymentUri(String),
    Submit { note: String },
    Reset,
    SwitchAccount(AccountCode),
}

/// 表示層に公開する状態のスナップショット
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendView {
    pub input: TxInput,
    /// 全額送金中はバックエンドが算出した金額
    pub native_amount: Option<String>,
    pub fiat_amount: String,
    pub proposal: Option<Proposal>,
    pub errors: ValidationErrors,
    pub is_updating: bool,
    pub is_debouncing: bool,
    pub is_converting: bool,
    pub is_sending: bool,
    pub send_result: Option<SendOutcome>,
    #[serde(skip)]
    applied: u64,
}

impl SendView {
    pub fn is_settled(&self) -> bool {
        !(self.is_updating || self.is_debouncing || self.is_converting || self.is_sending)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum AmountSource {
    User,
    Fiat,
}

enum Completion {
    Proposed {
        token: RequestToken,
        outcome: Result<ProposalResult, AppError>,
    },
    Converted {
        token: ConversionToken,
        outcome: Result<Option<String>, AppError>,
    },
    Sent {
        outcome: Result<SendOutcome, AppError>,
    },
}

#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    view: watch::Receiver<SendView>,
    sent: Arc<AtomicU64>,
}

impl SessionHandle {
    pub fn dispatch(&self, command: SessionCommand) -> Result<(), AppError> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        self.commands.send(command).map_err(|_| AppError::SessionClosed)
    }

    pub fn view(&self) -> SendView {
        self.view.borrow().clone()
    }

    /// これまでに送ったコマンドがすべて反映され、保留中の処理がなくなるまで待つ
    pub async fn settle(&mut self) -> Result<SendView, AppError> {
        let sent = self.sent.load(Ordering::SeqCst);
        let view = self
            .view
            .wait_for(|view| view.applied >= sent && view.is_settled())
            .await
            .map_err(|_| AppError::SessionClosed)?;
        Ok(view.clone())
    }
}

pub struct SendSession {
    settings: SessionSettings,
    service: Arc<dyn ProposalService>,
    input: TxInput,
    requester: ProposalRequester,
    proposals: ProposalState,
    amounts: AmountSynchronizer,
    /// URI読み取りの失敗。金額の形式エラーは金額欄、それ以外は宛先欄に出す
    scan_error: Option<(ErrorField, String)>,
    is_sending: bool,
    send_result: Option<SendOutcome>,
    applied: u64,
    completions: mpsc::UnboundedSender<Completion>,
    view: watch::Sender<SendView>,
}

async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    match time::timeout(limit, call).await {
        Ok(outcome) => outcome,
        Err(_) => Err(AppError::Timeout(limit)),
    }
}

impl SendSession {
    pub fn spawn(
        service: Arc<dyn ProposalService>,
        settings: SessionSettings,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(SendView::default());

        let session = SendSession {
            requester: ProposalRequester::new(settings.quiet_period),
            settings,
            service,
            input: TxInput::default(),
            proposals: ProposalState::default(),
            amounts: AmountSynchronizer::default(),
            scan_error: None,
            is_sending: false,
            send_result: None,
            applied: 0,
            completions: completions_tx,
            view: view_tx,
        };
        let task = tokio::spawn(session.run(commands_rx, completions_rx));

        let handle = SessionHandle {
            commands: commands_tx,
            view: view_rx,
            sent: Arc::new(AtomicU64::new(0)),
        };
        (handle, task)
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        log::info!("送金セッションを開始します。アカウント: {}", self.settings.account);
        self.publish();
        loop {
            let deadline = self.requester.deadline();
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(command) => {
                        self.applied += 1;
                        self.handle_command(command);
                    }
                    None => break,
                },
                Some(completion) = completions.recv() => self.handle_completion(completion),
                _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() => self.fire_proposal(),
            }
            self.publish();
        }
        log::info!("送金セッションを終了します。");
    }

    fn handle_command(&mut self, command: SessionCommand) {
        if matches!(
            command,
            SessionCommand::Update(_)
                | SessionCommand::EditFiat(_)
                | SessionCommand::ScanPaymentUri(_)
        ) {
            // 前回の送信結果は次の編集までしか表示しない
            self.send_result = None;
        }
        match command {
            SessionCommand::Update(update) => self.apply_update(update, AmountSource::User),
            SessionCommand::EditFiat(fiat_amount) => {
                match self.amounts.fiat_edited(fiat_amount, self.input.send_all) {
                    FiatEdit::Convert(request) => self.spawn_conversion(request),
                    FiatEdit::ClearNative => {
                        self.apply_update(FieldUpdate::Amount(String::new()), AmountSource::Fiat)
                    }
                    FiatEdit::Ignored => log::warn!("全額送金中のため法定通貨での入力を無視します。"),
                }
            }
            SessionCommand::ScanPaymentUri(uri) => self.scan_payment_uri(&uri),
            SessionCommand::Submit { note } => self.submit(note),
            SessionCommand::Reset => self.reset(),
            SessionCommand::SwitchAccount(account) => {
                log::info!("アカウントを切り替えます: {} -> {}", self.settings.account, account);
                self.settings.account = account;
                self.reset();
            }
        }
    }

    fn apply_update(&mut self, update: FieldUpdate, source: AmountSource) {
        log::debug!("フィールド更新: {} ({:?})", update.name(), source);
        let amount_changed = matches!(update, FieldUpdate::Amount(_));
        let send_all_released =
            matches!(update, FieldUpdate::SendAll(false)) && self.input.send_all;
        let edited_field = match update {
            FieldUpdate::Address(_) => Some(ErrorField::Address),
            FieldUpdate::Amount(_) => Some(ErrorField::Amount),
            _ => None,
        };
        let scan_field = self.scan_error.as_ref().map(|(field, _)| *field);
        if edited_field.is_some() && scan_field == edited_field {
            self.scan_error = None;
        }

        self.input.update(update);

        let complete = self.input.is_complete();
        if let Schedule::Cleared = self.requester.on_input_changed(complete, Instant::now()) {
            self.proposals.clear();
            // 全額送金中は金額の出どころが提案なので、fiat も一緒に消す
            if self.input.send_all {
                self.amounts.native_changed(None);
            }
        }

        // fiat 由来の書き込みは fiat に換算し直さない
        let request = if send_all_released {
            self.amounts.resume_from(&self.input)
        } else if amount_changed && source == AmountSource::User && !self.input.send_all {
            self.amounts.native_changed(self.input.amount.as_deref())
        } else {
            None
        };
        if let Some(request) = request {
            self.spawn_conversion(request);
        }
    }

    fn fire_proposal(&mut self) {
        let request = self.requester.fire(&self.settings.account, &self.input);
        log::debug!("提案リクエスト {:?} を送信します。", request.token);

        let service = Arc::clone(&self.service);
        let completions = self.completions.clone();
        let limit = self.settings.call_timeout;
        tokio::spawn(async move {
            let call = service.propose_transaction(&request.account, &request.input);
            let outcome = bounded(limit, call).await;
            let completion = Completion::Proposed { token: request.token, outcome };
            if completions.send(completion).is_err() {
                log::debug!("セッション終了後に提案の応答が届きました。");
            }
        });
    }

    fn spawn_conversion(&self, request: ConversionRequest) {
        let service = Arc::clone(&self.service);
        let completions = self.completions.clone();
        let coin = self.settings.coin;
        let fiat_unit = self.settings.fiat_unit.clone();
        let limit = self.settings.call_timeout;
        tokio::spawn(async move {
            let amount = request.amount.as_str();
            let outcome = match request.direction {
                Direction::ToFiat => {
                    bounded(limit, service.convert_to_fiat(amount, coin, &fiat_unit)).await
                }
                Direction::ToNative => {
                    bounded(limit, service.convert_from_fiat(amount, coin, &fiat_unit)).await
                }
            };
            if completions.send(Completion::Converted { token: request.token, outcome }).is_err() {
                log::debug!("セッション終了後に換算結果が届きました。");
            }
        });
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Proposed { token, outcome } => {
                if !self.requester.settle(token) {
                    log::debug!("古い提案リクエスト {:?} の応答を破棄します。", token);
                    return;
                }
                match outcome {
                    Ok(result) => {
                        self.proposals.apply(result);
                        if self.input.send_all {
                            let computed =
                                self.proposals.proposal().map(|p| p.amount.amount.clone());
                            let request = self.amounts.native_changed(computed.as_deref());
                            if let Some(request) = request {
                                self.spawn_conversion(request);
                            }
                        }
                    }
                    // 再試行はしない。次の入力で改めて問い合わせる
                    Err(e) => log::warn!("提案の取得に失敗しました。表示中の状態を維持します: {}", e),
                }
            }
            Completion::Converted { token, outcome } => {
                let outcome = outcome.unwrap_or_else(|e| {
                    log::warn!("金額の換算に失敗しました: {}", e);
                    None
                });
                match self.amounts.on_converted(token, outcome) {
                    Converted::Native(native) => {
                        let update = FieldUpdate::Amount(native.unwrap_or_default());
                        self.apply_update(update, AmountSource::Fiat)
                    }
                    Converted::Fiat => {}
                    Converted::Stale => log::debug!("古い換算結果 {:?} を破棄します。", token),
                }
            }
            Completion::Sent { outcome } => {
                self.is_sending = false;
                match outcome {
                    Ok(SendOutcome::Sent) => {
                        log::info!("トランザクションを送信しました。セッションを初期化します。");
                        self.reset();
                        self.send_result = Some(SendOutcome::Sent);
                    }
                    Ok(outcome) => {
                        log::warn!("トランザクションは送信されませんでした: {:?}", outcome);
                        self.send_result = Some(outcome);
                    }
                    Err(e) => {
                        log::error!("トランザクションの送信に失敗しました: {}", e);
                        self.send_result = Some(SendOutcome::Failed {
                            error_code: None,
                            error_message: Some(e.to_string()),
                        });
                    }
                }
            }
        }
    }

    fn scan_payment_uri(&mut self, uri: &str) {
        match parse_payment_uri(uri, self.settings.coin) {
            Ok(parsed) => {
                self.scan_error = None;
                self.apply_update(FieldUpdate::Address(parsed.address), AmountSource::User);
                if let Some(amount) = parsed.amount {
                    self.apply_update(FieldUpdate::Amount(amount), AmountSource::User);
                }
            }
            Err(e) => {
                log::warn!("支払いURIを読み取れませんでした: {}", e);
                let field = match &e {
                    AppError::BitcoinAmount(_) => ErrorField::Amount,
                    _ => ErrorField::Address,
                };
                self.scan_error = Some((field, e.to_string()));
            }
        }
    }

    fn submit(&mut self, note: String) {
        let ready = self.input.is_complete()
            && self.proposals.proposal().is_some()
            && !self.requester.is_updating()
            && !self.requester.is_debouncing()
            && !self.is_sending;
        if !ready {
            log::warn!("提案が確定していないため送信できません。");
            self.send_result = Some(SendOutcome::NotReady);
            return;
        }
        self.is_sending = true;
        self.send_result = None;

        let service = Arc::clone(&self.service);
        let completions = self.completions.clone();
        let account = self.settings.account.clone();
        tokio::spawn(async move {
            let outcome = match service.connect_keystore(&account).await {
                Ok(true) => service.send_tx(&account, &note).await,
                Ok(false) => {
                    log::warn!("キーストアが接続されなかったため送信を中止します。");
                    Ok(SendOutcome::Aborted)
                }
                Err(e) => {
                    log::warn!("キーストアへの接続に失敗したため送信を中止します: {}", e);
                    Ok(SendOutcome::Aborted)
                }
            };
            if completions.send(Completion::Sent { outcome }).is_err() {
                log::debug!("セッション終了後に送信結果が届きました。");
            }
        });
    }

    fn reset(&mut self) {
        self.input = TxInput::default();
        self.requester.reset();
        self.proposals.clear();
        self.amounts.reset();
        self.scan_error = None;
        self.send_result = None;
    }

    fn publish(&self) {
        let mut errors = self.proposals.errors().clone();
        if let Some(error) = self.amounts.error() {
            errors.entry(ErrorField::Amount).or_insert_with(|| error.to_string());
        }
        if let Some((field, error)) = &self.scan_error {
            errors.entry(*field).or_insert_with(|| error.clone());
        }
        let native_amount = if self.input.send_all {
            self.proposals.proposal().map(|p| p.amount.amount.clone())
        } else {
            self.input.amount.clone()
        };
        self.view.send_replace(SendView {
            input: self.input.clone(),
            native_amount,
            fiat_amount: self.amounts.fiat_amount().to_string(),
            proposal: self.proposals.proposal().cloned(),
            errors,
            is_updating: self.requester.is_updating(),
            is_debouncing: self.requester.is_debouncing(),
            is_converting: self.amounts.is_converting(),
            is_sending: self.is_sending,
            send_result: self.send_result.clone(),
            applied: self.applied,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicBool;
    use async_trait::async_trait;
    use crate::types::{Amount, ErrorCode, FeeTarget};

    const RATE: f64 = 50_000.0;
    const SPENDABLE: &str = "0.5";

    /// 応答遅延を金額ごとに指定できるバックエンドの代役
    #[derive(Default)]
    struct FakeBackend {
        proposals: Mutex<Vec<TxInput>>,
        to_fiat: Mutex<Vec<String>>,
        from_fiat: Mutex<Vec<String>>,
        notes: Mutex<Vec<String>>,
        latency: Mutex<HashMap<String, Duration>>,
        rejected: Mutex<HashMap<String, ErrorCode>>,
        transport_down: AtomicBool,
        conversions_down: AtomicBool,
        keystore_down: AtomicBool,
    }

    fn btc(amount: String) -> Amount {
        Amount { amount, unit: "BTC".to_string() }
    }

    impl FakeBackend {
        fn delay(&self, amount: &str, delay: Duration) {
            self.latency.lock().unwrap().insert(amount.to_string(), delay);
        }

        fn reject(&self, amount: &str, code: ErrorCode) {
            self.rejected.lock().unwrap().insert(amount.to_string(), code);
        }

        fn proposed_amounts(&self) -> Vec<Option<String>> {
            self.proposals.lock().unwrap().iter().map(|input| input.amount.clone()).collect()
        }
    }

    #[async_trait]
    impl ProposalService for FakeBackend {
        async fn propose_transaction(
            &self,
            _account: &AccountCode,
            input: &TxInput,
        ) -> Result<ProposalResult, AppError> {
            self.proposals.lock().unwrap().push(input.clone());
            let amount = if input.send_all {
                SPENDABLE.to_string()
            } else {
                input.amount.clone().unwrap_or_default()
            };
            let delay = self.latency.lock().unwrap().get(&amount).copied();
            time::sleep(delay.unwrap_or(Duration::from_millis(50))).await;

            if self.transport_down.load(Ordering::SeqCst) {
                return Err(AppError::Backend {
                    endpoint: "tx-proposal".to_string(),
                    message: "offline".to_string(),
                });
            }
            if let Some(code) = self.rejected.lock().unwrap().get(&amount) {
                return Ok(ProposalResult::Failure(*code));
            }
            let value: f64 = amount.parse().unwrap_or(0.0);
            Ok(ProposalResult::Success(Proposal {
                fee: btc("0.0001".to_string()),
                total: btc(format!("{:.8}", value + 0.0001)),
                amount: btc(amount),
            }))
        }

        async fn convert_to_fiat(
            &self,
            amount: &str,
            _coin: CoinCode,
            _fiat_unit: &str,
        ) -> Result<Option<String>, AppError> {
            self.to_fiat.lock().unwrap().push(amount.to_string());
            time::sleep(Duration::from_millis(10)).await;
            if self.conversions_down.load(Ordering::SeqCst) {
                return Ok(None);
            }
            Ok(amount.parse::<f64>().ok().map(|value| format!("{:.2}", value * RATE)))
        }

        async fn convert_from_fiat(
            &self,
            fiat_amount: &str,
            _coin: CoinCode,
            _fiat_unit: &str,
        ) -> Result<Option<String>, AppError> {
            self.from_fiat.lock().unwrap().push(fiat_amount.to_string());
            time::sleep(Duration::from_millis(10)).await;
            if self.conversions_down.load(Ordering::SeqCst) {
                return Ok(None);
            }
            Ok(fiat_amount.parse::<f64>().ok().map(|value| format!("{:.8}", value / RATE)))
        }

        async fn connect_keystore(&self, _account: &AccountCode) -> Result<bool, AppError> {
            time::sleep(Duration::from_millis(20)).await;
            Ok(!self.keystore_down.load(Ordering::SeqCst))
        }

        async fn send_tx(
            &self,
            _account: &AccountCode,
            note: &str,
        ) -> Result<SendOutcome, AppError> {
            self.notes.lock().unwrap().push(note.to_string());
            time::sleep(Duration::from_millis(100)).await;
            Ok(SendOutcome::Sent)
        }
    }

    fn start(backend: &Arc<FakeBackend>) -> SessionHandle {
        let account = AccountCode("v0-test-tbtc-0".to_string());
        let settings = SessionSettings::new(account, CoinCode::Tbtc, "USD");
        let (handle, _task) = SendSession::spawn(backend.clone(), settings);
        handle
    }

    fn update(handle: &SessionHandle, update: FieldUpdate) {
        handle.dispatch(SessionCommand::Update(update)).unwrap();
    }

    fn fill_recipient(handle: &SessionHandle) {
        update(handle, FieldUpdate::Address("tb1qrecipient".to_string()));
        update(handle, FieldUpdate::FeeTarget(Some(FeeTarget::Normal)));
    }

    fn proposed_amount(view: &SendView) -> Option<&str> {
        view.proposal.as_ref().map(|p| p.amount.amount.as_str())
    }

    #[tokio::test(start_paused = true)]
    async fn bursts_of_edits_collapse_into_one_call() {
        let backend = Arc::new(FakeBackend::default());
        let mut handle = start(&backend);
        fill_recipient(&handle);
        for amount in ["0.1", "0.12", "0.123"] {
            update(&handle, FieldUpdate::Amount(amount.to_string()));
            time::sleep(Duration::from_millis(100)).await;
        }
        let view = handle.settle().await.unwrap();

        assert_eq!(backend.proposed_amounts(), vec![Some("0.123".to_string())]);
        assert_eq!(proposed_amount(&view), Some("0.123"));
        assert!(!view.is_updating);
    }

    #[tokio::test(start_paused = true)]
    async fn late_response_never_overwrites_newer_one() {
        let backend = Arc::new(FakeBackend::default());
        backend.delay("1", Duration::from_millis(1000));
        backend.delay("2", Duration::from_millis(10));
        let mut handle = start(&backend);
        fill_recipient(&handle);

        update(&handle, FieldUpdate::Amount("1".to_string()));
        // 400ms で1回目が飛び、1400ms まで戻らない
        time::sleep(Duration::from_millis(500)).await;
        assert!(handle.view().is_updating);
        update(&handle, FieldUpdate::Amount("2".to_string()));

        let view = handle.settle().await.unwrap();
        assert_eq!(proposed_amount(&view), Some("2"));

        time::sleep(Duration::from_secs(2)).await;
        let view = handle.settle().await.unwrap();
        assert_eq!(proposed_amount(&view), Some("2"));
        assert_eq!(backend.proposed_amounts().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_response_arriving_first_is_ignored() {
        let backend = Arc::new(FakeBackend::default());
        backend.delay("1", Duration::from_millis(700));
        backend.delay("2", Duration::from_millis(500));
        let mut handle = start(&backend);
        fill_recipient(&handle);

        update(&handle, FieldUpdate::Amount("1".to_string()));
        time::sleep(Duration::from_millis(500)).await;
        update(&handle, FieldUpdate::Amount("2".to_string()));

        // 1100ms: 1回目の応答は届いているが、2回目 (900ms 発火) はまだ
        time::sleep(Duration::from_millis(650)).await;
        let view = handle.view();
        assert_eq!(view.proposal, None);
        assert!(view.is_updating);

        let view = handle.settle().await.unwrap();
        assert_eq!(proposed_amount(&view), Some("2"));
    }

    #[tokio::test(start_paused = true)]
    async fn fiat_edit_updates_native_once_without_looping() {
        let backend = Arc::new(FakeBackend::default());
        let mut handle = start(&backend);
        fill_recipient(&handle);

        handle.dispatch(SessionCommand::EditFiat("100".to_string())).unwrap();
        let view = handle.settle().await.unwrap();

        assert_eq!(*backend.from_fiat.lock().unwrap(), vec!["100".to_string()]);
        assert!(backend.to_fiat.lock().unwrap().is_empty());
        assert_eq!(view.input.amount.as_deref(), Some("0.00200000"));
        assert_eq!(view.fiat_amount, "100");
        assert_eq!(backend.proposed_amounts(), vec![Some("0.00200000".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn native_and_fiat_round_trip_within_rounding() {
        let backend = Arc::new(FakeBackend::default());
        let mut handle = start(&backend);

        update(&handle, FieldUpdate::Amount("0.01".to_string()));
        let view = handle.settle().await.unwrap();
        assert_eq!(view.fiat_amount, "500.00");

        handle.dispatch(SessionCommand::EditFiat(view.fiat_amount.clone())).unwrap();
        let view = handle.settle().await.unwrap();
        let native: f64 = view.input.amount.as_deref().unwrap().parse().unwrap();
        assert!((native - 0.01).abs() < 1e-8);
        assert_eq!(backend.to_fiat.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn amount_rejection_clears_the_proposal() {
        let backend = Arc::new(FakeBackend::default());
        backend.reject("5", ErrorCode::InsufficientFunds);
        let mut handle = start(&backend);
        fill_recipient(&handle);

        update(&handle, FieldUpdate::Amount("0.1".to_string()));
        assert!(handle.settle().await.unwrap().proposal.is_some());

        update(&handle, FieldUpdate::Amount("5".to_string()));
        let view = handle.settle().await.unwrap();
        assert_eq!(view.proposal, None);
        assert!(!view.errors[&ErrorField::Amount].is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn incomplete_input_clears_results_without_calling() {
        let backend = Arc::new(FakeBackend::default());
        backend.reject("0.2", ErrorCode::FeeTooLow);
        let mut handle = start(&backend);
        fill_recipient(&handle);
        update(&handle, FieldUpdate::Amount("0.2".to_string()));
        assert!(!handle.settle().await.unwrap().errors.is_empty());

        update(&handle, FieldUpdate::Address(String::new()));
        let view = handle.settle().await.unwrap();
        assert!(view.errors.is_empty());
        assert_eq!(view.proposal, None);
        assert_eq!(backend.proposed_amounts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_keeps_previous_state() {
        let backend = Arc::new(FakeBackend::default());
        let mut handle = start(&backend);
        fill_recipient(&handle);
        update(&handle, FieldUpdate::Amount("0.1".to_string()));
        handle.settle().await.unwrap();

        backend.transport_down.store(true, Ordering::SeqCst);
        update(&handle, FieldUpdate::Amount("0.3".to_string()));
        let view = handle.settle().await.unwrap();
        assert_eq!(proposed_amount(&view), Some("0.1"));
        assert!(view.errors.is_empty());
        assert!(!view.is_updating);
        assert_eq!(backend.proposed_amounts().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_call_times_out() {
        let backend = Arc::new(FakeBackend::default());
        backend.delay("0.1", Duration::from_secs(120));
        let mut handle = start(&backend);
        fill_recipient(&handle);
        update(&handle, FieldUpdate::Amount("0.1".to_string()));

        let view = handle.settle().await.unwrap();
        assert!(!view.is_updating);
        assert_eq!(view.proposal, None);
    }

    #[tokio::test(start_paused = true)]
    async fn send_all_takes_amount_from_backend() {
        let backend = Arc::new(FakeBackend::default());
        let mut handle = start(&backend);
        fill_recipient(&handle);
        update(&handle, FieldUpdate::Amount("0.1".to_string()));
        update(&handle, FieldUpdate::SendAll(true));

        let view = handle.settle().await.unwrap();
        assert_eq!(view.native_amount.as_deref(), Some(SPENDABLE));
        assert_eq!(view.fiat_amount, "25000.00");

        handle.dispatch(SessionCommand::EditFiat("1".to_string())).unwrap();
        update(&handle, FieldUpdate::SendAll(false));
        let view = handle.settle().await.unwrap();
        assert!(backend.from_fiat.lock().unwrap().is_empty());
        assert_eq!(view.native_amount.as_deref(), Some("0.1"));
        assert_eq!(view.fiat_amount, "5000.00");
    }

    #[tokio::test(start_paused = true)]
    async fn send_all_fiat_clears_when_input_becomes_incomplete() {
        let backend = Arc::new(FakeBackend::default());
        let mut handle = start(&backend);
        fill_recipient(&handle);
        update(&handle, FieldUpdate::SendAll(true));
        let view = handle.settle().await.unwrap();
        assert_eq!(view.native_amount.as_deref(), Some(SPENDABLE));
        assert_eq!(view.fiat_amount, "25000.00");

        update(&handle, FieldUpdate::Address(String::new()));
        let view = handle.settle().await.unwrap();
        assert_eq!(view.proposal, None);
        assert_eq!(view.native_amount, None);
        assert_eq!(view.fiat_amount, "");

        // 入力が揃い直せば提案の金額から再び換算される
        update(&handle, FieldUpdate::Address("tb1qrecipient".to_string()));
        let view = handle.settle().await.unwrap();
        assert_eq!(view.fiat_amount, "25000.00");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_conversion_leaves_fiat_empty_with_error() {
        let backend = Arc::new(FakeBackend::default());
        backend.conversions_down.store(true, Ordering::SeqCst);
        let mut handle = start(&backend);

        update(&handle, FieldUpdate::Amount("0.3".to_string()));
        let view = handle.settle().await.unwrap();
        assert_eq!(view.fiat_amount, "");
        assert!(view.errors.contains_key(&ErrorField::Amount));
        assert_eq!(view.input.amount.as_deref(), Some("0.3"));

        handle.dispatch(SessionCommand::EditFiat("20".to_string())).unwrap();
        let view = handle.settle().await.unwrap();
        assert_eq!(view.input.amount, None);
        assert!(view.errors.contains_key(&ErrorField::Amount));
    }

    #[tokio::test(start_paused = true)]
    async fn successful_send_resets_the_session() {
        let backend = Arc::new(FakeBackend::default());
        let mut handle = start(&backend);
        fill_recipient(&handle);
        update(&handle, FieldUpdate::Amount("0.1".to_string()));
        handle.settle().await.unwrap();

        handle.dispatch(SessionCommand::Submit { note: "rent".to_string() }).unwrap();
        let view = handle.settle().await.unwrap();

        assert_eq!(view.input, TxInput::default());
        assert_eq!(view.fiat_amount, "");
        assert_eq!(view.proposal, None);
        assert!(!view.is_updating);
        assert_eq!(view.send_result, Some(SendOutcome::Sent));
        assert_eq!(*backend.notes.lock().unwrap(), vec!["rent".to_string()]);

        update(&handle, FieldUpdate::Address("tb1qnext".to_string()));
        let view = handle.settle().await.unwrap();
        assert_eq!(view.send_result, None);
    }

    #[tokio::test(start_paused = true)]
    async fn unconnected_keystore_aborts_without_sending() {
        let backend = Arc::new(FakeBackend::default());
        backend.keystore_down.store(true, Ordering::SeqCst);
        let mut handle = start(&backend);
        fill_recipient(&handle);
        update(&handle, FieldUpdate::Amount("0.1".to_string()));
        handle.settle().await.unwrap();

        handle.dispatch(SessionCommand::Submit { note: "rent".to_string() }).unwrap();
        let view = handle.settle().await.unwrap();
        assert_eq!(view.send_result, Some(SendOutcome::Aborted));
        assert!(backend.notes.lock().unwrap().is_empty());
        assert_eq!(view.input.amount.as_deref(), Some("0.1"));
        assert!(view.proposal.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn submit_without_proposal_is_refused() {
        let backend = Arc::new(FakeBackend::default());
        let mut handle = start(&backend);
        update(&handle, FieldUpdate::Address("tb1qrecipient".to_string()));

        handle.dispatch(SessionCommand::Submit { note: String::new() }).unwrap();
        let view = handle.settle().await.unwrap();
        assert_eq!(view.send_result, Some(SendOutcome::NotReady));
        assert!(backend.notes.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn scanned_uri_fills_address_and_amount() {
        let backend = Arc::new(FakeBackend::default());
        let mut handle = start(&backend);
        update(&handle, FieldUpdate::FeeTarget(Some(FeeTarget::Low)));

        handle
            .dispatch(SessionCommand::ScanPaymentUri("bitcoin:tb1qshop?amount=0.25".to_string()))
            .unwrap();
        let view = handle.settle().await.unwrap();
        assert_eq!(view.input.address.as_deref(), Some("tb1qshop"));
        assert_eq!(view.fiat_amount, "12500.00");
        assert!(view.proposal.is_some());

        handle.dispatch(SessionCommand::ScanPaymentUri("mailto:someone".to_string())).unwrap();
        let view = handle.settle().await.unwrap();
        assert!(view.errors.contains_key(&ErrorField::Address));
        assert_eq!(view.input.address.as_deref(), Some("tb1qshop"));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_scanned_amount_is_an_amount_error() {
        let backend = Arc::new(FakeBackend::default());
        let mut handle = start(&backend);

        let uri = "bitcoin:tb1qshop?amount=0.123456789".to_string();
        handle.dispatch(SessionCommand::ScanPaymentUri(uri)).unwrap();
        let view = handle.settle().await.unwrap();
        assert!(view.errors.contains_key(&ErrorField::Amount));
        assert!(!view.errors.contains_key(&ErrorField::Address));
        assert_eq!(view.input.address, None);

        // 宛先の編集では消えず、金額の編集で消える
        update(&handle, FieldUpdate::Address("tb1qshop".to_string()));
        let view = handle.settle().await.unwrap();
        assert!(view.errors.contains_key(&ErrorField::Amount));
        update(&handle, FieldUpdate::Amount("0.12".to_string()));
        let view = handle.settle().await.unwrap();
        assert!(!view.errors.contains_key(&ErrorField::Amount));
    }

    #[tokio::test(start_paused = true)]
    async fn switching_account_starts_from_empty_input() {
        let backend = Arc::new(FakeBackend::default());
        let mut handle = start(&backend);
        fill_recipient(&handle);
        update(&handle, FieldUpdate::Amount("0.1".to_string()));
        handle.settle().await.unwrap();

        handle
            .dispatch(SessionCommand::SwitchAccount(AccountCode("v0-test-tbtc-1".to_string())))
            .unwrap();
        let view = handle.settle().await.unwrap();
        assert_eq!(view.input, TxInput::default());
        assert_eq!(view.proposal, None);
        assert!(view.errors.is_empty());
    }
}
