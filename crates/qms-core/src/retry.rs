//! Retry configuration for file operations.

use std::time::Duration;

/// Fixed-count, fixed-backoff retry policy for copy/delete operations that
/// can hit transient locks (antivirus scans, another process holding the
/// file open).
///
/// The expected contention source is a single competing process, so there is
/// no jitter and no exponential growth. Tests inject a zero-backoff variant.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
  /// Total attempts, including the first one. Must be at least 1.
  pub attempts: u32,
  /// Pause between attempts.
  pub backoff:  Duration,
}

impl RetryPolicy {
  /// A policy that tries exactly once with no pause.
  pub const fn none() -> Self {
    Self { attempts: 1, backoff: Duration::ZERO }
  }

  /// Retry immediately, without sleeping. Used in tests.
  pub const fn immediate(attempts: u32) -> Self {
    Self { attempts, backoff: Duration::ZERO }
  }
}

impl Default for RetryPolicy {
  /// Three attempts, two seconds apart — the deployment default.
  fn default() -> Self {
    Self { attempts: 3, backoff: Duration::from_secs(2) }
  }
}
