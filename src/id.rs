use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Generate a process-unique identifier such as `run-1718000000000-4242-7`.
///
/// Timestamp and pid keep ids distinct across processes; the sequence number
/// keeps them distinct within one millisecond of the same process.
pub fn generate_id(prefix: &str) -> String {
    let timestamp_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}-{}-{}", prefix, timestamp_ms, std::process::id(), seq)
}

pub fn generate_run_id() -> String {
    generate_id("run")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_within_process() {
        let a = generate_run_id();
        let b = generate_run_id();
        assert_ne!(a, b);
        assert!(a.starts_with("run-"));
    }
}
