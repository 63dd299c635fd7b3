// 📊 Report - plain-text view of collectors and the audit log

use crate::aggregate::{money, Drift};
use crate::audit::AuditEntry;
use crate::entities::Collector;
use std::fmt::Write;

pub fn render_collectors(collectors: &[Collector]) -> String {
    let mut out = String::from("Collectors with updated totals:\n");
    if collectors.is_empty() {
        out.push_str(" (none)\n");
    }
    for c in collectors {
        let _ = writeln!(
            out,
            " - {} (@{}): {} cards | total value = {}",
            c.name,
            c.handle,
            c.total_cards,
            money(c.total_value)
        );
    }
    out
}

pub fn render_audit_log(entries: &[AuditEntry]) -> String {
    let mut out = String::from("Audit log:\n");
    if entries.is_empty() {
        out.push_str(" (empty)\n");
    }
    for entry in entries {
        let _ = writeln!(
            out,
            " - {} (recorded at {})",
            entry.message,
            entry.recorded_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    out
}

pub fn render_drifts(drifts: &[Drift]) -> String {
    if drifts.is_empty() {
        return "✓ All collector totals match their holdings\n".to_string();
    }

    let mut out = format!("❌ {} collector(s) out of sync:\n", drifts.len());
    for d in drifts {
        let _ = writeln!(
            out,
            " - @{}: stored {} cards / {}, holdings say {} cards / {}",
            d.handle,
            d.stored.total_cards,
            money(d.stored.total_value),
            d.actual.total_cards,
            money(d.actual.total_value)
        );
    }
    out
}
