//! Console rendering of agent status and notices.

use std::fmt::Write as _;
use std::sync::Mutex;

use smartlock_core::Notice;
use smartlock_sync::{TagEventEmitter, TagSyncStatus};

/// Prints status changes and notices to stdout.
///
/// Only the parts that changed since the previous status are printed, so a
/// tag list refresh does not repeat the connection line and vice versa.
pub struct ConsoleEmitter {
    last: Mutex<Option<TagSyncStatus>>,
}

impl ConsoleEmitter {
    pub fn new() -> Self {
        ConsoleEmitter {
            last: Mutex::new(None),
        }
    }
}

impl Default for ConsoleEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl TagEventEmitter for ConsoleEmitter {
    fn emit_status(&self, status: &TagSyncStatus) {
        let Ok(mut last) = self.last.lock() else {
            return;
        };

        let link_changed = last.as_ref().map_or(true, |prev| {
            prev.is_connected != status.is_connected
                || prev.connection_state != status.connection_state
        });
        let view_changed = last.as_ref().map_or(true, |prev| prev.view != status.view);

        if link_changed {
            println!("{}", render_link(status));
        }
        if view_changed {
            println!("{}", render_tags(status));
        }

        *last = Some(status.clone());
    }

    fn emit_notice(&self, notice: &Notice) {
        println!("! {}", notice.message());
    }
}

/// Connection indicator line.
pub fn render_link(status: &TagSyncStatus) -> String {
    if status.is_connected {
        "● connected".to_string()
    } else {
        format!("○ {}", status.connection_state)
    }
}

/// Tag list with pending operation markers.
pub fn render_tags(status: &TagSyncStatus) -> String {
    let view = &status.view;
    let mut out = String::new();

    let _ = write!(out, "Tags ({})", view.tags.len());
    for tag in &view.tags {
        let _ = write!(out, "\n  {}", tag);
        if view.deleting.as_ref() == Some(tag) {
            out.push_str("  Deleting...");
        }
    }
    if view.tags.is_empty() {
        out.push_str("\n  (none)");
    }
    if view.adding {
        out.push_str("\n  + Waiting... present a card to the reader");
    }

    out
}

/// Multi-line status summary for the `status` command.
pub fn render_status(status: &TagSyncStatus) -> String {
    let view = &status.view;
    let mut out = render_link(status);

    match view.add_deadline {
        Some(deadline) => {
            let _ = write!(out, "\nadd: waiting until {}", deadline.format("%H:%M:%S"));
        }
        None => out.push_str("\nadd: idle"),
    }

    match (&view.deleting, view.delete_deadline) {
        (Some(tag), Some(deadline)) => {
            let _ = write!(
                out,
                "\ndelete: {} until {}",
                tag,
                deadline.format("%H:%M:%S")
            );
        }
        _ => out.push_str("\ndelete: idle"),
    }

    if let Some(notice) = &status.last_notice {
        let _ = write!(out, "\nlast notice: {}", notice);
    }

    out
}
