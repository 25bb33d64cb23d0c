// ネイティブ金額 (正) と法定通貨表示の同期。
// fiat 入力から得たネイティブ金額は逆方向に変換し直さない。
use crate::input::TxInput;

const CONVERSION_FAILED: &str = "金額を換算できません";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ConversionToken(u64);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    ToFiat,
    ToNative,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    pub token: ConversionToken,
    pub direction: Direction,
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FiatEdit {
    /// fiat が空になったのでネイティブ金額も空にする
    ClearNative,
    Convert(ConversionRequest),
    /// 全額送金中は fiat 入力を受け付けない
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Converted {
    /// fiat 表示だけが変わった
    Fiat,
    /// ネイティブ金額に書き込む。None は換算失敗で空にする
    Native(Option<String>),
    Stale,
}

#[derive(Debug, Default)]
pub struct AmountSynchronizer {
    fiat_amount: String,
    synced_native: Option<String>,
    next_token: u64,
    pending: Option<(ConversionToken, Direction)>,
    error: Option<String>,
}

impl AmountSynchronizer {
    pub fn fiat_amount(&self) -> &str {
        &self.fiat_amount
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_converting(&self) -> bool {
        self.pending.is_some()
    }

    fn request(&mut self, direction: Direction, amount: &str) -> ConversionRequest {
        self.next_token += 1;
        let token = ConversionToken(self.next_token);
        self.pending = Some((token, direction));
        ConversionRequest {
            token,
            direction,
            amount: amount.to_string(),
        }
    }

    /// ネイティブ金額が変わった (手入力、全額送金の算出額、スキャンした金額)
    pub fn native_changed(&mut self, native: Option<&str>) -> Option<ConversionRequest> {
        let native = native.filter(|n| !n.is_empty());
        let in_sync = native.is_some()
            && native == self.synced_native.as_deref()
            && self.error.is_none()
            && !matches!(self.pending, Some((_, Direction::ToNative)));
        if in_sync {
            return None;
        }
        self.error = None;
        match native {
            None => {
                self.pending = None;
                self.synced_native = None;
                self.fiat_amount.clear();
                None
            }
            Some(native) => {
                self.synced_native = Some(native.to_string());
                Some(self.request(Direction::ToFiat, native))
            }
        }
    }

    /// 全額送金の解除時は最後のネイティブ金額から換算を再開する
    pub fn resume_from(&mut self, input: &TxInput) -> Option<ConversionRequest> {
        self.synced_native = None;
        self.native_changed(input.amount.as_deref())
    }

    pub fn fiat_edited(&mut self, fiat_amount: String, send_all: bool) -> FiatEdit {
        if send_all {
            return FiatEdit::Ignored;
        }
        self.error = None;
        self.fiat_amount = fiat_amount;
        if self.fiat_amount.is_empty() {
            self.pending = None;
            self.synced_native = None;
            return FiatEdit::ClearNative;
        }
        let fiat_amount = self.fiat_amount.clone();
        FiatEdit::Convert(self.request(Direction::ToNative, &fiat_amount))
    }

    /// 換算結果を受け取る。最後に依頼したもの以外は捨てる
    pub fn on_converted(&mut self, token: ConversionToken, outcome: Option<String>) -> Converted {
        let direction = match self.pending {
            Some((pending, direction)) if pending == token => direction,
            _ => return Converted::Stale,
        };
        self.pending = None;
        match (direction, outcome) {
            (Direction::ToFiat, Some(fiat_amount)) => {
                self.fiat_amount = fiat_amount;
                Converted::Fiat
            }
            (Direction::ToFiat, None) => {
                self.fiat_amount.clear();
                self.synced_native = None;
                self.error = Some(CONVERSION_FAILED.to_string());
                Converted::Fiat
            }
            (Direction::ToNative, Some(native)) => {
                self.synced_native = Some(native.clone());
                Converted::Native(Some(native))
            }
            (Direction::ToNative, None) => {
                self.synced_native = None;
                self.error = Some(CONVERSION_FAILED.to_string());
                Converted::Native(None)
            }
        }
    }

    pub fn reset(&mut self) {
        self.fiat_amount.clear();
        self.synced_native = None;
        self.pending = None;
        self.error = None;
    }
}
