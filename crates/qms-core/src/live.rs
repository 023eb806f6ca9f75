//! The `LiveConnections` trait — the restore engine's handle on whatever is
//! holding the live database open.

use std::future::Future;

/// Access to the pooled connections of the live database, so they can be
/// released before the file is replaced out from under them.
pub trait LiveConnections: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Close every open connection to the live database.
  ///
  /// After this returns the holder must not issue further queries until it
  /// reopens. Quiesce is best-effort — the restore engine logs a failure and
  /// proceeds, since the file is about to be replaced regardless.
  fn quiesce(&self) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}
