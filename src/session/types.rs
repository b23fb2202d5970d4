use crate::error::AppError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const DEFAULT_STRATEGY: &str = "ADX_MACD_WillR_Supertrend";
pub const DEFAULT_INTERVAL: &str = "1";

pub fn slot_key(index: usize) -> String {
    format!("stock_{index}")
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActiveView {
    #[default]
    Connect,
    Select,
    Results,
}

impl ActiveView {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Select => "select",
            Self::Results => "results",
        }
    }

    pub fn parse_str(value: &str) -> Result<Self, AppError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "connect" => Ok(Self::Connect),
            "select" => Ok(Self::Select),
            "results" => Ok(Self::Results),
            other => Err(AppError::InvalidArgument(format!(
                "unsupported active view '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum SelectionType {
    #[default]
    Equity,
    Commodity,
}

impl SelectionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equity => "EQUITY",
            Self::Commodity => "COMMODITY",
        }
    }

    pub fn parse_str(value: &str) -> Result<Self, AppError> {
        match value.trim().to_ascii_uppercase().as_str() {
            "EQUITY" => Ok(Self::Equity),
            "COMMODITY" => Ok(Self::Commodity),
            other => Err(AppError::InvalidArgument(format!(
                "unsupported selection type '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeStatus {
    Running,
    Stopped,
    Unknown,
}

impl TradeStatus {
    pub fn from_wire(status: Option<&str>) -> Self {
        match status.map(str::trim) {
            Some("running") => Self::Running,
            Some("stopped") => Self::Stopped,
            _ => Self::Unknown,
        }
    }

    pub fn is_running(self) -> bool {
        self == Self::Running
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TradeStatusWire {
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TradeStateWire {
    #[serde(default)]
    pub exists: bool,
    #[serde(default)]
    pub state: Option<TradeStateSnapshotWire>,
}

/// Both fields stay untyped so a malformed section is skipped instead of
/// failing the whole snapshot.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TradeStateSnapshotWire {
    #[serde(default, rename = "selectedBrokers")]
    pub selected_brokers: Option<Value>,
    #[serde(default, rename = "tradingParameters")]
    pub trading_parameters: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeStateSnapshot {
    pub exists: bool,
    pub selected_brokers: Option<Vec<BrokerSelection>>,
    pub trading_parameters: Option<Vec<TradingParameters>>,
}

impl TradeStateWire {
    pub fn into_snapshot(self) -> TradeStateSnapshot {
        let state = self.state.unwrap_or_default();
        TradeStateSnapshot {
            exists: self.exists,
            selected_brokers: decode_list(state.selected_brokers),
            trading_parameters: decode_list(state.trading_parameters),
        }
    }
}

fn decode_list<T: for<'de> Deserialize<'de>>(value: Option<Value>) -> Option<Vec<T>> {
    let Some(Value::Array(items)) = value else {
        return None;
    };
    Some(
        items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
    )
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrokerSelection {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub credentials: Value,
    #[serde(default, rename = "profileData")]
    pub profile_data: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Per-slot parameters. Numeric fields accept numbers or numeric strings and
/// fall back to zero; unknown fields are kept so they round-trip to the
/// backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradingParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol_key: Option<String>,
    #[serde(default, alias = "symbol")]
    pub symbol_value: Option<String>,
    #[serde(default)]
    pub broker: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub strategy: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub interval: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub lots: f64,
    #[serde(default, deserialize_with = "lenient_number")]
    pub lot_size: f64,
    #[serde(default, deserialize_with = "lenient_number")]
    pub tick_size: f64,
    #[serde(default, deserialize_with = "lenient_number")]
    pub target_percentage: f64,
    #[serde(default, deserialize_with = "lenient_number")]
    pub total_shares: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TradingParameters {
    pub fn with_recomputed_shares(mut self) -> Self {
        self.total_shares = self.lots * self.lot_size;
        self
    }

    pub fn has_broker(&self) -> bool {
        self.broker
            .as_deref()
            .is_some_and(|broker| !broker.trim().is_empty())
    }

    pub fn symbol(&self) -> &str {
        self.symbol_value.as_deref().unwrap_or_default()
    }
}

fn lenient_number<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(number) => number.as_f64().unwrap_or(0.0),
        Value::String(text) => text.trim().parse::<f64>().unwrap_or(0.0),
        Value::Bool(true) => 1.0,
        _ => 0.0,
    })
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    })
}

/// Client-side mirror of the trading session. Server state wins at the next
/// successful reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradingSessionState {
    pub broker_count: usize,
    pub selected_brokers: Vec<BrokerSelection>,
    pub stock_count: usize,
    pub trading_parameters: BTreeMap<String, TradingParameters>,
    pub trading_status: BTreeMap<String, SlotStatus>,
    pub active_view: ActiveView,
    pub selection_type: SelectionType,
}

impl Default for TradingSessionState {
    fn default() -> Self {
        Self {
            broker_count: 1,
            selected_brokers: vec![BrokerSelection::default()],
            stock_count: 1,
            trading_parameters: BTreeMap::new(),
            trading_status: BTreeMap::new(),
            active_view: ActiveView::default(),
            selection_type: SelectionType::default(),
        }
    }
}

impl TradingSessionState {
    pub fn is_trading_active(&self) -> bool {
        self.trading_status
            .values()
            .any(|status| *status == SlotStatus::Active)
    }

    pub fn restore_brokers(&mut self, brokers: Vec<BrokerSelection>) {
        self.broker_count = brokers.len();
        self.selected_brokers = brokers;
    }

    /// Replaces every slot with the server's list; all restored slots are
    /// marked active.
    pub fn restore_parameters(&mut self, parameters: Vec<TradingParameters>) {
        self.stock_count = parameters.len();
        self.trading_parameters = parameters
            .into_iter()
            .enumerate()
            .map(|(index, params)| (slot_key(index), params.with_recomputed_shares()))
            .collect();
        self.trading_status = self
            .trading_parameters
            .keys()
            .map(|key| (key.clone(), SlotStatus::Active))
            .collect();
    }

    pub fn slot(&self, index: usize) -> Option<&TradingParameters> {
        self.trading_parameters.get(&slot_key(index))
    }

    /// Parameters for `index` when it lies within `stock_count`.
    pub fn configured_slot(&self, index: usize) -> Option<&TradingParameters> {
        if index >= self.stock_count {
            return None;
        }
        self.slot(index)
    }

    pub fn slot_status(&self, index: usize) -> SlotStatus {
        self.trading_status
            .get(&slot_key(index))
            .copied()
            .unwrap_or(SlotStatus::Inactive)
    }

    pub fn set_slot_status(&mut self, index: usize, status: SlotStatus) {
        self.trading_status.insert(slot_key(index), status);
    }

    /// Forgets everything except the local selection-type preference.
    pub fn reset(&mut self) {
        let selection_type = self.selection_type;
        *self = Self {
            selection_type,
            ..Self::default()
        };
    }
}
