//! Styling for the per-job ✓/✗ summary lines printed by the queue engine
//! and the harvester.
//!
//! Both commands usually run from cron, so these lines end up in cron mail
//! and captured log files as often as on a terminal. `NO_COLOR` is how an
//! operator tells us escapes would be noise there; when it is set, the
//! styles below degrade to no-ops and the summary stays plain text.

use anstyle::{AnsiColor, Color, Style};

/// Whether ANSI escapes may be emitted at all.
pub fn colors_enabled() -> bool {
    std::env::var_os("NO_COLOR").is_none()
}

/// Style for a success summary line, or a no-op style when colors are off.
pub fn success_style() -> Style {
    if colors_enabled() {
        Style::new().fg_color(Some(Color::Ansi(AnsiColor::Green)))
    } else {
        Style::new()
    }
}

/// Style for a failure summary line, or a no-op style when colors are off.
pub fn failure_style() -> Style {
    if colors_enabled() {
        Style::new().fg_color(Some(Color::Ansi(AnsiColor::Red)))
    } else {
        Style::new()
    }
}
