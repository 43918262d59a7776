//! Human-readable conversion summary.

use crate::Conversion;

pub fn format_summary(conversion: &Conversion) -> String {
    let mut out = String::new();

    out.push_str("\n╔══════════════════════════════════════════╗\n");
    out.push_str("║  capplan sizing conversion               ║\n");
    out.push_str("╠══════════════════════════════════════════╣\n");
    out.push_str(&format!("║  Rows:       {:<28}║\n", conversion.rows_read));
    out.push_str(&format!("║  Databases:  {:<28}║\n", conversion.resources.len()));
    out.push_str(&format!("║  Plan lines: {:<28}║\n", conversion.plan.len()));
    out.push_str(&format!("║  Skipped:    {:<28}║\n", conversion.skipped.len()));
    out.push_str("╚══════════════════════════════════════════╝\n\n");

    if !conversion.plan.is_empty() {
        out.push_str("Creation plan:\n\n");
        out.push_str(&format!(
            "  {:>10}  {:>4}  {:<5}  {:<22}  {:>10}\n",
            "size (GB)", "qty", "repl", "measured by", "value"
        ));
        for entry in &conversion.plan {
            out.push_str(&format!(
                "  {:>10}  {:>4}  {:<5}  {:<22}  {:>10}\n",
                entry.dataset_size_gb,
                entry.count,
                entry.replication,
                entry.throughput_unit.as_str(),
                entry.throughput_value
            ));
        }
        out.push('\n');
    }

    if !conversion.skipped.is_empty() {
        out.push_str("Skipped rows:\n\n");
        for s in &conversion.skipped {
            out.push_str(&format!("  line {}: {}\n", s.line, s.error));
        }
        out.push('\n');
    }

    out
}
