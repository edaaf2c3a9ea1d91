use std::path::Path;

use chrono::SecondsFormat;

use crate::types::Fill;

/// Write the per-session trade log: one CSV row per fill, RFC3339
/// timestamps, eight decimal places for price and quantity.
pub fn write_trade_log(path: &Path, fills: &[Fill]) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["Timestamp", "Side", "Price", "Quantity", "Symbol"])?;

    for fill in fills {
        writer.write_record([
            fill.filled_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            fill.side.to_string(),
            format!("{:.8}", fill.price),
            format!("{:.8}", fill.quantity),
            fill.symbol.clone(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}
