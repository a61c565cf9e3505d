use crate::monitor::CycleReport;
use crate::types::PriceAlert;

/// Emit a price alert as a single JSON line to stdout.
pub fn report_alert(alert: &PriceAlert) {
    if let Ok(json) = serde_json::to_string(alert) {
        println!("{json}");
    }
}

/// Emit a polling cycle summary as a single JSON line to stdout.
pub fn report_cycle(report: &CycleReport) {
    if let Ok(json) = serde_json::to_string(report) {
        println!("{json}");
    }
}
