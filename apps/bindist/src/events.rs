//! Event handling and user feedback

use bindist_events::{AppEvent, CacheEvent, EventMessage, GeneralEvent, RelocationEvent};
use console::{Style, Term};

use crate::logging::log_event_with_tracing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tone {
    Success,
    Warning,
    Failure,
}

/// Forwards every event to tracing and prints the ones a user acts on
pub struct EventHandler {
    colors_enabled: bool,
    /// Suppress human-readable status lines
    quiet: bool,
    term: Term,
}

impl EventHandler {
    pub fn new(colors_enabled: bool, quiet: bool) -> Self {
        Self {
            colors_enabled,
            quiet,
            term: Term::stderr(),
        }
    }

    /// Handle incoming event
    pub fn handle_event(&mut self, message: EventMessage) {
        log_event_with_tracing(&message);
        if self.quiet {
            return;
        }
        if let Some((tone, line)) = status_line(&message.event) {
            let style = match tone {
                Tone::Success => Style::new().green(),
                Tone::Warning => Style::new().yellow(),
                Tone::Failure => Style::new().red().bold(),
            }
            .force_styling(self.colors_enabled);
            self.term
                .write_line(&style.apply_to(line).to_string())
                .unwrap_or(());
        }
    }
}

fn status_line(event: &AppEvent) -> Option<(Tone, String)> {
    match event {
        AppEvent::General(GeneralEvent::Warning { message, context }) => Some((
            Tone::Warning,
            match context {
                Some(context) => format!("warning: {message} ({context})"),
                None => format!("warning: {message}"),
            },
        )),
        AppEvent::Relocation(RelocationEvent::FileFailed { path, failure }) => Some((
            Tone::Warning,
            format!("not relocated: {} ({})", path.display(), failure.message),
        )),
        AppEvent::Relocation(RelocationEvent::ValidationFailed { offending, .. }) => Some((
            Tone::Failure,
            format!(
                "{} file(s) still reference the old install root",
                offending.len()
            ),
        )),
        AppEvent::Cache(CacheEvent::Published {
            package,
            mirror,
            signed,
            ..
        }) => Some((
            Tone::Success,
            format!(
                "Published {package} to {mirror}{}",
                if *signed { "" } else { " (unsigned)" }
            ),
        )),
        AppEvent::Cache(CacheEvent::SignatureSkipped { package, phase }) => Some((
            Tone::Warning,
            format!("Skipping signature {phase} for {package}"),
        )),
        AppEvent::Cache(CacheEvent::Installed {
            package,
            prefix,
            unrelocated,
        }) => Some((
            if unrelocated.is_empty() {
                Tone::Success
            } else {
                Tone::Warning
            },
            format!(
                "Installed {package} into {}{}",
                prefix.display(),
                match unrelocated.len() {
                    0 => String::new(),
                    n => format!(" ({n} file(s) not relocated)"),
                }
            ),
        )),
        AppEvent::Cache(CacheEvent::KeyInstalled { id, path }) => Some((
            Tone::Success,
            format!("Trusted key {id} ({})", path.display()),
        )),
        _ => None,
    }
}
