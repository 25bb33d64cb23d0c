use std::time::Duration;
use serde::Deserialize;
use crate::input::FieldUpdate;
use crate::session::{SessionCommand, SessionSettings};
use crate::types::{AccountCode, CoinCode};

fn default_debounce_ms() -> u64 {
    400
}

fn default_call_timeout_secs() -> u64 {
    15
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioConfig {
    pub account: AccountCode,
    pub coin: CoinCode, // CLIの --coin で上書き可能
    pub fiat_unit: String,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    pub steps: Vec<ScenarioStep>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioStep {
    /// このステップの前に待つ時間
    #[serde(default)]
    pub wait_ms: u64,
    /// true なら保留中の提案・換算が片付くのを待ってから実行する
    #[serde(default)]
    pub settle: bool,
    pub action: ScenarioAction,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ScenarioAction {
    Update(FieldUpdate),
    FiatAmount(String),
    ScanUri(String),
    Submit {
        #[serde(default)]
        note: String,
    },
    Reset,
    SwitchAccount(AccountCode),
}

impl From<ScenarioAction> for SessionCommand {
    fn from(action: ScenarioAction) -> Self {
        match action {
            ScenarioAction::Update(update) => SessionCommand::Update(update),
            ScenarioAction::FiatAmount(fiat_amount) => SessionCommand::EditFiat(fiat_amount),
            ScenarioAction::ScanUri(uri) => SessionCommand::ScanPaymentUri(uri),
            ScenarioAction::Submit { note } => SessionCommand::Submit { note },
            ScenarioAction::Reset => SessionCommand::Reset,
            ScenarioAction::SwitchAccount(account) => SessionCommand::SwitchAccount(account),
        }
    }
}

impl ScenarioConfig {
    pub fn settings(&self, coin: CoinCode) -> SessionSettings {
        let mut settings = SessionSettings::new(self.account.clone(), coin, &self.fiat_unit);
        settings.quiet_period = Duration::from_millis(self.debounce_ms);
        settings.call_timeout = Duration::from_secs(self.call_timeout_secs);
        settings
    }
}
