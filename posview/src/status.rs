// posview/src/status.rs
// Combines the live subscription and closed-position query states into one loading flag.

use crate::account::ViewMode;

/// `controller_loading OR (mode == Closed AND fetch_in_flight)`.
pub fn project_loading(controller_loading: bool, mode: ViewMode, fetch_in_flight: bool) -> bool {
  controller_loading || (mode == ViewMode::Closed && fetch_in_flight)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_projection_table() {
    let cases = [
      (false, ViewMode::Open, false, false),
      (true, ViewMode::Open, false, true),
      (false, ViewMode::Open, true, false), // A fetch in open mode does not count.
      (false, ViewMode::Closed, true, true),
      (false, ViewMode::Closed, false, false),
      (true, ViewMode::Closed, false, true),
    ];
    for (controller, mode, fetch, expected) in cases {
      assert_eq!(project_loading(controller, mode, fetch), expected, "{:?}", (controller, mode, fetch));
    }
  }
}
