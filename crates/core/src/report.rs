use std::fmt::Write as _;

use crate::outcome::{RunOutcomes, StreamOutcome};
use crate::progress::{BackupPlan, RestorePlan};

/// Binary-prefixed size: `82 B`, `1.5 KiB`, `15 MiB`.
pub fn format_ibytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut size = bytes as f64;
    let mut unit_idx = 0;
    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }
    if size < 10.0 {
        format!("{:.1} {}", size, UNITS[unit_idx])
    } else {
        format!("{:.0} {}", size, UNITS[unit_idx])
    }
}

pub fn format_comma(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

pub fn render_backup_plan(plan: &BackupPlan) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Performing backup of all streams to {}\n",
        plan.target.display()
    );
    let _ = writeln!(out, "    Streams: {}", format_comma(plan.streams as u64));
    let _ = writeln!(out, "       Size: {}", format_ibytes(plan.total_bytes));
    let _ = writeln!(
        out,
        "  Consumers: {}",
        format_comma(plan.total_consumers as u64)
    );
    out
}

pub fn render_restore_plan(plan: &RestorePlan) -> String {
    format!(
        "Restoring backup of all {} streams ({}) in directory {:?}\n",
        plan.streams.len(),
        format_ibytes(plan.total_bytes),
        plan.source.display().to_string()
    )
}

pub fn render_stream_outcome(outcome: &StreamOutcome) -> Option<String> {
    outcome
        .reason()
        .map(|reason| format!("Backup of {} failed: {reason}", outcome.stream))
}

pub fn render_outcomes(outcomes: &RunOutcomes) -> String {
    let mut out = String::new();
    if !outcomes.warnings.is_empty() {
        out.push_str("Backup Warnings:\n");
        for w in &outcomes.warnings {
            let _ = writeln!(out, "  {}: {}", w.stream, w.reason().unwrap_or_default());
        }
        out.push('\n');
    }
    if !outcomes.failures.is_empty() {
        out.push_str("Backup failures:\n");
        for f in &outcomes.failures {
            let _ = writeln!(out, "  {}: {}", f.stream, f.reason().unwrap_or_default());
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::model::StorageType;
    use std::path::PathBuf;

    #[test]
    fn ibytes_matches_binary_prefixes() {
        assert_eq!(format_ibytes(0), "0 B");
        assert_eq!(format_ibytes(1023), "1023 B");
        assert_eq!(format_ibytes(1024), "1.0 KiB");
        assert_eq!(format_ibytes(1536), "1.5 KiB");
        assert_eq!(format_ibytes(15 * 1024 * 1024), "15 MiB");
    }

    #[test]
    fn comma_groups_thousands() {
        assert_eq!(format_comma(0), "0");
        assert_eq!(format_comma(999), "999");
        assert_eq!(format_comma(1000), "1,000");
        assert_eq!(format_comma(1234567), "1,234,567");
    }

    #[test]
    fn plan_lists_totals() {
        let text = render_backup_plan(&BackupPlan {
            target: PathBuf::from("/tmp/bk"),
            streams: 3,
            total_bytes: 2048,
            total_consumers: 1200,
        });
        assert!(text.starts_with("Performing backup of all streams to /tmp/bk\n"));
        assert!(text.contains("    Streams: 3\n"));
        assert!(text.contains("       Size: 2.0 KiB\n"));
        assert!(text.contains("  Consumers: 1,200\n"));
    }

    #[test]
    fn outcomes_render_warnings_before_failures() {
        let mut run = RunOutcomes::new();
        run.record::<()>(
            "BROKEN",
            &Err(Error::Service {
                message: "timeout".to_string(),
            }),
        );
        run.record::<()>(
            "CACHE",
            &Err(Error::UnsupportedStorage {
                stream: "CACHE".to_string(),
                storage: StorageType::Memory,
            }),
        );

        let text = render_outcomes(&run);
        let warn_at = text.find("Backup Warnings:").unwrap();
        let fail_at = text.find("Backup failures:").unwrap();
        assert!(warn_at < fail_at);
        assert!(text.contains("  CACHE: memory storage streams can not be backed up\n"));
        assert!(text.contains("  BROKEN: service error: timeout\n"));

        assert_eq!(render_outcomes(&RunOutcomes::new()), "");
    }
}
