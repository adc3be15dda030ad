use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const MAJOR_ARCANA_COUNT: usize = 22;

/// 星座データ。内容はアプリ側が解釈するため不透明なまま保持する
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZodiacSignEntry(pub Value);

impl ZodiacSignEntry {
    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seer {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub character: String,
    #[serde(default)]
    pub coins: Vec<i64>,
    #[serde(default)]
    pub experience: Vec<String>,
    #[serde(default)]
    pub fortunes: Vec<String>,
    #[serde(default)]
    pub info: String,
    #[serde(default)]
    pub lifestory: String,
    #[serde(default)]
    pub note: String,
    /// 回答までの目安（分）
    #[serde(default)]
    pub responsetime: u32,
    #[serde(default)]
    pub url: String,
}

impl Seer {
    /// 名前から安定した id を導出する（小文字化し空白を `_` に置換）
    pub fn derive_id(name: &str) -> String {
        name.to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_")
    }

    pub fn with_derived_id(mut self) -> Self {
        if self.id.trim().is_empty() {
            self.id = Self::derive_id(&self.name);
        }
        self
    }

    /// 占い種別ごとの価格（`fortunes` と `coins` は添字で対応）
    pub fn price_for(&self, fortune: &str) -> Option<i64> {
        self.fortunes
            .iter()
            .position(|f| f.eq_ignore_ascii_case(fortune))
            .and_then(|index| self.coins.get(index).copied())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TarotCard {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub info: String,
    #[serde(default)]
    pub url: String,
}

impl TarotCard {
    /// 同梱フォールバック用の大アルカナ 22 枚
    pub fn major_arcana() -> Vec<TarotCard> {
        (0..MAJOR_ARCANA_COUNT)
            .map(|i| TarotCard {
                id: i.to_string(),
                name: format!("Tarot Card {i}"),
                info: format!("Major Arcana card number {i}"),
                url: String::new(),
            })
            .collect()
    }

    pub fn arcana_number(&self) -> Option<usize> {
        self.id
            .parse::<usize>()
            .ok()
            .filter(|n| *n < MAJOR_ARCANA_COUNT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn seer_id_is_derived_from_name() {
        assert_eq!(Seer::derive_id("Madame  Zara"), "madame_zara");
        assert_eq!(Seer::derive_id("Ayşe Teyze"), "ayşe_teyze");

        let seer: Seer = serde_json::from_value(json!({
            "name": "Falcı Nene",
            "fortunes": ["Kahve Falı", "Tarot"],
            "coins": [50, 80]
        }))
        .unwrap();
        let seer = seer.with_derived_id();
        assert_eq!(seer.id, "falcı_nene");
        assert_eq!(seer.price_for("tarot"), Some(80));
        assert_eq!(seer.price_for("El Falı"), None);
    }

    #[test]
    fn major_arcana_has_twenty_two_cards() {
        let cards = TarotCard::major_arcana();
        assert_eq!(cards.len(), 22);
        assert_eq!(cards[0].name, "Tarot Card 0");
        assert_eq!(cards[21].info, "Major Arcana card number 21");
        assert!(cards.iter().all(|card| card.url.is_empty()));
        assert_eq!(cards[7].arcana_number(), Some(7));
    }
}
