use crate::application::ports::BundledDatasets;
use crate::domain::entities::{Seer, TarotCard};
use crate::domain::value_objects::DatasetKey;
use crate::shared::error::AppError;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

const SEER_ROSTER: &str = include_str!("../../../assets/seers.json");

#[derive(Deserialize)]
struct SeerRoster {
    seer: Vec<Seer>,
}

/// アプリ同梱のフォールバックデータ。星座は同梱しない
#[derive(Debug, Clone, Default)]
pub struct BundledCatalog {
    datasets: HashMap<DatasetKey, Vec<Value>>,
}

impl BundledCatalog {
    pub fn embedded() -> Result<Self, AppError> {
        Self::from_seer_roster(SEER_ROSTER)
    }

    pub fn from_seer_roster(json: &str) -> Result<Self, AppError> {
        let roster: SeerRoster = serde_json::from_str(json)?;
        let seers = roster
            .seer
            .into_iter()
            .map(|seer| serde_json::to_value(seer.with_derived_id()))
            .collect::<Result<Vec<_>, _>>()?;
        let tarots = TarotCard::major_arcana()
            .into_iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::default()
            .with_dataset(DatasetKey::seers(), seers)
            .with_dataset(DatasetKey::tarots(), tarots))
    }

    pub fn with_dataset(mut self, key: DatasetKey, documents: Vec<Value>) -> Self {
        self.datasets.insert(key, documents);
        self
    }
}

impl BundledDatasets for BundledCatalog {
    fn fallback(&self, key: &DatasetKey) -> Option<Vec<Value>> {
        self.datasets.get(key).cloned()
    }
}
