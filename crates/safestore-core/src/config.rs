//! Runtime knobs for a [`Vault`](crate::vault::Vault).

use serde::Deserialize;

/// Vault behaviour that differs between deployments.
///
/// Every field has a default, so an empty config section deserialises to
/// [`VaultConfig::default`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
  /// Session lifetime in hours. `None` keeps sessions until logout.
  pub session_ttl_hours:      Option<i64>,
  /// Maximum number of retained audit entries; the oldest are evicted first.
  pub audit_retention:        usize,
  /// Largest accepted upload, in bytes, before encoding.
  pub max_file_bytes:         u64,
  /// Upper bound on each remote image fetch attempt.
  pub preview_timeout_secs:   u64,
  /// Start a session as part of a successful registration.
  pub auto_login_on_register: bool,
}

impl Default for VaultConfig {
  fn default() -> Self {
    Self {
      session_ttl_hours:      Some(24),
      audit_retention:        100,
      max_file_bytes:         5 * 1024 * 1024,
      preview_timeout_secs:   10,
      auto_login_on_register: false,
    }
  }
}
