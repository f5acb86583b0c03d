//! Presentation helpers shared by view layers.

const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

/// Human-readable size with base-1024 units and at most two decimals,
/// e.g. `1536 -> "1.5 KB"`.
pub fn format_size(bytes: u64) -> String {
  if bytes == 0 {
    return "0 Bytes".to_owned();
  }

  let mut value = bytes as f64;
  let mut unit = 0;
  while value >= 1024.0 && unit < UNITS.len() - 1 {
    value /= 1024.0;
    unit += 1;
  }

  let rounded = format!("{value:.2}");
  let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
  format!("{trimmed} {}", UNITS[unit])
}
