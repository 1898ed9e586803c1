//! Plain-text rendering of a telemetry snapshot

use super::aggregator::TelemetrySnapshot;
use super::stats::{Counter, LatencyPhase, PhaseStats};
use std::fmt::Write;
use std::time::Duration;

const RULE: &str = "------------------------------------------------------------";

fn phase_line(out: &mut String, label: &str, stats: &PhaseStats) {
    if stats.count == 0 {
        let _ = writeln!(out, "  {:<14} -", label);
        return;
    }
    let _ = writeln!(
        out,
        "  {:<14} count={:<6} min={}ms avg={:.1}ms max={}ms",
        label,
        stats.count,
        stats.min_ms,
        stats.average_ms(),
        stats.max_ms
    );
}

/// Render the final report for a run that took `elapsed`
pub fn render(snapshot: &TelemetrySnapshot, elapsed: Duration) -> String {
    let mut out = String::new();

    for (worker, phases) in &snapshot.workers {
        let _ = writeln!(out, "{}", RULE);
        let _ = writeln!(out, "Worker {}", worker);
        for phase in LatencyPhase::ALL {
            phase_line(&mut out, phase.label(), &phases.get(&phase).copied().unwrap_or_default());
        }
    }

    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out, "Total ({:.1}s)", elapsed.as_secs_f64());

    let counters = &snapshot.counters;
    let counter_rows = [
        ("requested", Counter::Requested),
        ("started", Counter::Started),
        ("completed", Counter::CompletedSuccessfully),
        ("closed", Counter::Closed),
        ("cancelled", Counter::Cancelled),
        ("start failed", Counter::StartFailed),
        ("task failed", Counter::TaskFailed),
        ("stop timed out", Counter::StopTimedOut),
        ("create failed", Counter::CreateFailed),
    ];
    for (label, counter) in counter_rows {
        let _ = writeln!(out, "  {:<14} {}", label, counters.get(counter));
    }
    if counters.requested > 0 {
        let _ = writeln!(
            out,
            "  {:<14} {:.2}%",
            "success rate",
            counters.completed_successfully as f64 * 100.0 / counters.requested as f64
        );
    }

    let _ = writeln!(out, "Latency since start request");
    for phase in LatencyPhase::ALL {
        phase_line(&mut out, phase.label(), &snapshot.phase(phase));
    }

    let histogram = &snapshot.start_histogram;
    let _ = writeln!(out, "Start acknowledgment");
    let buckets = [
        ("<= 50ms", histogram.le_50ms),
        ("<= 100ms", histogram.le_100ms),
        ("<= 200ms", histogram.le_200ms),
        ("<= 500ms", histogram.le_500ms),
        ("<= 1000ms", histogram.le_1000ms),
        ("> 1000ms", histogram.over_1000ms),
    ];
    let total = histogram.total();
    for (label, count) in buckets {
        let share = if total == 0 { 0.0 } else { count as f64 * 100.0 / total as f64 };
        let _ = writeln!(out, "  {:<14} {:<6} {:.2}%", label, count, share);
    }

    let _ = writeln!(
        out,
        "Send call      frames={} avg={}us",
        snapshot.send.frames,
        snapshot.send.average_us()
    );
    let _ = writeln!(
        out,
        "Audio          iterations={} avg={}ms",
        snapshot.audio.iterations,
        snapshot.audio.average_ms()
    );
    let _ = writeln!(out, "{}", RULE);

    out
}
