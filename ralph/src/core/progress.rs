//! Elapsed-time and ETA formatting for status output.
//!
//! Everything here works on whole seconds so callers decide what "now" is.

/// `Hh Mm` above an hour, `Mm Ss` above a minute, otherwise `Ss`.
pub fn format_elapsed(secs: i64) -> String {
    let secs = secs.max(0);
    let (hours, rest) = (secs / 3600, secs % 3600);
    let (minutes, seconds) = (rest / 60, rest % 60);
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// Action timers never roll over into hours: `Mm Ss` or `Ss`.
pub fn format_action_elapsed(secs: i64) -> String {
    let secs = secs.max(0);
    let (minutes, seconds) = (secs / 60, secs % 60);
    if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// Projected seconds until every item completes, from the average time spent
/// per completed item so far.
///
/// `None` until at least one item is complete, and once nothing remains.
pub fn estimate_remaining_secs(elapsed_secs: i64, completed: usize, remaining: usize) -> Option<i64> {
    if completed == 0 || remaining == 0 {
        return None;
    }
    let per_item = elapsed_secs.max(0) as f64 / completed as f64;
    Some((per_item * remaining as f64) as i64)
}

/// `~Hh Mm`, `~Mm`, or `~<1m`.
pub fn format_eta(secs: i64) -> String {
    let secs = secs.max(0);
    let (hours, minutes) = (secs / 3600, (secs % 3600) / 60);
    if hours > 0 {
        format!("~{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("~{minutes}m")
    } else {
        "~<1m".to_string()
    }
}
