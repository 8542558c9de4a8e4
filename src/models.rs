use chrono::NaiveDateTime;
use serde_json::{Map, Value};
use std::fmt;

/// Quote fields persisted for every instrument unless a subset is configured.
pub const RECORDED_COLUMNS: [&str; 32] = [
    "tradability",
    "state",
    "issue_date",
    "chain_symbol",
    "adjusted_mark_price",
    "strike_price",
    "ask_price",
    "ask_size",
    "bid_price",
    "bid_size",
    "break_even_price",
    "high_price",
    "last_trade_price",
    "last_trade_size",
    "low_price",
    "mark_price",
    "open_interest",
    "previous_close_date",
    "previous_close_price",
    "volume",
    "chance_of_profit_long",
    "chance_of_profit_short",
    "delta",
    "gamma",
    "implied_volatility",
    "rho",
    "theta",
    "vega",
    "high_fill_rate_buy_price",
    "high_fill_rate_sell_price",
    "low_fill_rate_buy_price",
    "low_fill_rate_sell_price",
];

pub const TIME_COLUMN: &str = "Time";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn default_columns() -> Vec<String> {
    RECORDED_COLUMNS.iter().map(|c| c.to_string()).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionSide {
    Call,
    Put,
}

impl OptionSide {
    pub const ALL: [OptionSide; 2] = [OptionSide::Call, OptionSide::Put];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "call" => Some(Self::Call),
            "put" => Some(Self::Put),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Call => "Call",
            Self::Put => "Put",
        }
    }
}

impl fmt::Display for OptionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of resolving a symbol against the snapshot source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainListing {
    pub chain_id: String,
    pub expirations: Vec<String>,
}

/// Everything a scheduling unit needs to know about its symbol. Built once at setup
/// and owned by the unit for the rest of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolContext {
    pub symbol: String,
    pub chain_id: String,
    pub expirations: Vec<String>,
}

impl SymbolContext {
    pub fn new(symbol: impl Into<String>, listing: ChainListing) -> Self {
        Self {
            symbol: symbol.into(),
            chain_id: listing.chain_id,
            expirations: listing.expirations,
        }
    }
}

/// One tradable contract as returned by a fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentRecord {
    pub id: String,
    pub strike_price: f64,
    pub side: OptionSide,
    pub fields: Map<String, Value>,
}

impl InstrumentRecord {
    /// Values for `columns` in order, blank where the quote lacks the field.
    pub fn column_values(&self, columns: &[String]) -> Vec<String> {
        columns
            .iter()
            .map(|column| match self.fields.get(column) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(text)) => text.clone(),
                Some(other) => other.to_string(),
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub sub_key: String,
    pub taken_at: NaiveDateTime,
    pub records: Vec<InstrumentRecord>,
}

impl Snapshot {
    pub fn timestamp_label(&self) -> String {
        self.taken_at.format(TIMESTAMP_FORMAT).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn column_values_follow_requested_order_and_blank_missing_fields() {
        let mut fields = Map::new();
        fields.insert("mark_price".to_string(), json!("1.25"));
        fields.insert("volume".to_string(), json!(42));
        fields.insert("delta".to_string(), Value::Null);
        let record = InstrumentRecord {
            id: "abc".to_string(),
            strike_price: 100.0,
            side: OptionSide::Call,
            fields,
        };

        let columns = vec![
            "volume".to_string(),
            "delta".to_string(),
            "mark_price".to_string(),
            "rho".to_string(),
        ];
        assert_eq!(
            record.column_values(&columns),
            vec!["42", "", "1.25", ""]
        );
    }

    #[test]
    fn option_side_parses_case_insensitively() {
        assert_eq!(OptionSide::parse(" CALL "), Some(OptionSide::Call));
        assert_eq!(OptionSide::parse("put"), Some(OptionSide::Put));
        assert_eq!(OptionSide::parse("straddle"), None);
    }
}
