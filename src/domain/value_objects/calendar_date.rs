use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

const DATE_FORMAT: &str = "%Y-%m-%d";
pub const NEVER_CLAIMED: &str = "1970-01-01";

/// 端末ローカル時刻での暦日（YYYY-MM-DD で保存される）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CalendarDate(NaiveDate);

impl CalendarDate {
    /// 「一度も実行していない」を表す番兵値。どの実日付よりも小さい
    pub fn never() -> Self {
        Self(NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default())
    }

    pub fn from_naive(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        let trimmed = value.trim();
        NaiveDate::parse_from_str(trimmed, DATE_FORMAT)
            .map(Self)
            .map_err(|err| format!("Invalid calendar date '{trimmed}': {err}"))
    }

    /// 保存値を解釈する。欠落・空文字は番兵値として扱う
    pub fn from_stored(value: Option<&str>) -> Result<Self, String> {
        match value.map(str::trim) {
            None | Some("") => Ok(Self::never()),
            Some(raw) => Self::parse(raw),
        }
    }

    /// 解釈できない保存値も番兵値に落とす。元のエラーは呼び出し側へ返す
    pub fn from_stored_lenient(value: Option<&str>) -> (Self, Option<String>) {
        match Self::from_stored(value) {
            Ok(date) => (date, None),
            Err(err) => (Self::never(), Some(err)),
        }
    }

    pub fn is_never(&self) -> bool {
        *self == Self::never()
    }

    pub fn as_naive(&self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for CalendarDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DATE_FORMAT))
    }
}

impl From<CalendarDate> for String {
    fn from(date: CalendarDate) -> Self {
        date.to_string()
    }
}

impl TryFrom<String> for CalendarDate {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl FromStr for CalendarDate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// 1日1回アクションの判定結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DailyWindow {
    /// 本日まだ実行していない
    Open,
    /// 本日実行済み
    UsedToday,
    /// 保存日付が本日より未来（端末時計の巻き戻し）
    StoredInFuture,
}

impl DailyWindow {
    pub fn evaluate(last: CalendarDate, today: CalendarDate) -> Self {
        match last.cmp(&today) {
            std::cmp::Ordering::Less => DailyWindow::Open,
            std::cmp::Ordering::Equal => DailyWindow::UsedToday,
            std::cmp::Ordering::Greater => DailyWindow::StoredInFuture,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, DailyWindow::Open)
    }
}
