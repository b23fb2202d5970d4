use serde::Serialize;

const TABLE_MARKERS: [&str; 2] = ["INDICATOR:", "OPTIONS:"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum LineClass {
    BuySignal,
    SellSignal,
    NoSignal,
    Table { header: Vec<String>, values: Vec<String> },
    /// Marker present but fewer than two `|` rows; `body` is the text after it.
    TableText { body: String },
    Plain,
}

impl LineClass {
    pub fn is_signal(&self) -> bool {
        matches!(self, Self::BuySignal | Self::SellSignal | Self::NoSignal)
    }
}

/// Classifies a formatted log line for display. Tables win over signal
/// markers.
pub fn classify(line: &str) -> LineClass {
    if let Some(table) = classify_table(line) {
        return table;
    }

    let lowered = line.to_ascii_lowercase();
    if line.contains("SIGNAL_BUY") || lowered.contains("buy signal generated") {
        LineClass::BuySignal
    } else if line.contains("SIGNAL_SELL") || lowered.contains("sell signal generated") {
        LineClass::SellSignal
    } else if line.contains("SIGNAL_NONE") || lowered.contains("no trade signal generated") {
        LineClass::NoSignal
    } else {
        LineClass::Plain
    }
}

fn classify_table(line: &str) -> Option<LineClass> {
    let body = TABLE_MARKERS
        .iter()
        .find_map(|marker| line.split_once(marker).map(|(_, rest)| rest.trim()))?;

    let rows: Vec<&str> = body
        .lines()
        .map(str::trim)
        .filter(|row| row.starts_with('|'))
        .collect();

    let [header, values, ..] = rows.as_slice() else {
        return Some(LineClass::TableText {
            body: body.to_string(),
        });
    };

    Some(LineClass::Table {
        header: split_cells(header),
        values: split_cells(values),
    })
}

fn split_cells(row: &str) -> Vec<String> {
    row.split('|')
        .map(str::trim)
        .filter(|cell| !cell.is_empty())
        .map(str::to_string)
        .collect()
}
