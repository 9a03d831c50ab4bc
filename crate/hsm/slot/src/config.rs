use std::{collections::BTreeSet, fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    HError, HResult, SlotIdentifier, hsm_ensure,
    mechanism::{ConfiguredMechanismFilter, SingleMechanismFilter, SlotIdFilter, parse_mechanism},
};

/// Configuration of one slot, usually read from a TOML file:
///
/// ```toml
/// module_name = "default"
/// read_only = false
///
/// [slot]
/// index = 0
/// id = 1
///
/// [[mechanism_filters]]
/// slots = [{ index = 0 }]
/// mechanisms = ["CKM_RSA_PKCS_KEY_PAIR_GEN", "0x1040"]
/// ```
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct SlotConfig {
    /// Name of the PKCS#11 module, used in logs and reports
    pub module_name: String,

    /// The slot to open
    pub slot: SlotIdentifier,

    /// Refuse every operation modifying the token
    pub read_only: bool,

    /// Ordered mechanism filters; the first one matching the slot decides
    pub mechanism_filters: Vec<MechanismFilterConfig>,
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self {
            module_name: "default".to_owned(),
            slot: SlotIdentifier::new(0, 0),
            read_only: false,
            mechanism_filters: Vec::new(),
        }
    }
}

/// Mechanisms permitted on the matching slots.
/// Entries are mechanism names (`CKM_RSA_PKCS`) or hex or decimal codes.
#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct MechanismFilterConfig {
    /// Slots this filter applies to; absent means every slot
    pub slots: Option<Vec<SlotIdFilterConfig>>,
    pub mechanisms: Vec<String>,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct SlotIdFilterConfig {
    pub index: Option<u32>,
    pub id: Option<u64>,
}

impl From<SlotIdFilterConfig> for SlotIdFilter {
    fn from(config: SlotIdFilterConfig) -> Self {
        Self {
            index: config.index,
            id: config.id,
        }
    }
}

impl SlotConfig {
    pub fn from_toml_str(content: &str) -> HResult<Self> {
        let config: Self = toml::from_str(content)?;
        hsm_ensure!(
            !config.module_name.trim().is_empty(),
            HError::Config("module_name must not be blank".to_owned())
        );
        Ok(config)
    }

    pub fn load(path: &Path) -> HResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            HError::Config(format!(
                "cannot read the slot configuration {}: {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Build the runtime mechanism filter; unknown mechanism names are an error
    pub fn mechanism_filter(&self) -> HResult<ConfiguredMechanismFilter> {
        let mut filter = ConfiguredMechanismFilter::default();
        for filter_config in &self.mechanism_filters {
            let mechanisms = filter_config
                .mechanisms
                .iter()
                .map(|m| {
                    parse_mechanism(m).map_err(|e| HError::Config(format!("mechanism filter: {e}")))
                })
                .collect::<HResult<BTreeSet<_>>>()?;
            let slots = filter_config
                .slots
                .as_ref()
                .map(|slots| slots.iter().copied().map(SlotIdFilter::from).collect());
            filter.add_filter(SingleMechanismFilter::new(slots, mechanisms));
        }
        Ok(filter)
    }
}
