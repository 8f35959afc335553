//! Structured logging integration for events
//!
//! Converts domain events into tracing records with structured fields so
//! `--json` output can be consumed by log tooling.

use bindist_events::{AppEvent, CacheEvent, EventMessage, GeneralEvent, RelocationEvent};
use tracing::{debug, error, info, warn};

/// Log an event at its level with structured fields
pub fn log_event_with_tracing(message: &EventMessage) {
    match &message.event {
        AppEvent::General(event) => log_general(message, event),
        AppEvent::Relocation(event) => log_relocation(message, event),
        AppEvent::Cache(event) => log_cache(message, event),
    }
}

fn log_general(message: &EventMessage, event: &GeneralEvent) {
    let meta = &message.meta;
    match event {
        GeneralEvent::Warning {
            message: text,
            context,
        } => {
            warn!(
                source = meta.source.as_str(),
                event_id = %meta.event_id,
                context = ?context,
                "{text}"
            );
        }
    }
}

fn log_relocation(message: &EventMessage, event: &RelocationEvent) {
    let meta = &message.meta;
    match event {
        RelocationEvent::AnalysisCompleted {
            prefix,
            textfiles,
            links,
            binaries,
        } => {
            info!(
                source = meta.source.as_str(),
                event_id = %meta.event_id,
                prefix = %prefix.display(),
                textfiles = textfiles,
                links = links,
                binaries = binaries,
                "Install tree analyzed"
            );
        }
        RelocationEvent::Started {
            prefix,
            old_root,
            new_root,
        } => {
            info!(
                source = meta.source.as_str(),
                event_id = %meta.event_id,
                prefix = %prefix.display(),
                old_root = %old_root.display(),
                new_root = %new_root.display(),
                "Relocation started"
            );
        }
        RelocationEvent::FilePatched { path, kind } => {
            debug!(
                source = meta.source.as_str(),
                event_id = %meta.event_id,
                path = %path.display(),
                kind = %kind,
                "File relocated"
            );
        }
        RelocationEvent::FileFailed { path, failure } => {
            warn!(
                source = meta.source.as_str(),
                event_id = %meta.event_id,
                path = %path.display(),
                retryable = failure.retryable,
                code = ?failure.code,
                error = %failure.message,
                hint = ?failure.hint,
                "File could not be relocated"
            );
        }
        RelocationEvent::Completed {
            prefix,
            relocated,
            failed,
        } => {
            info!(
                source = meta.source.as_str(),
                event_id = %meta.event_id,
                prefix = %prefix.display(),
                relocated = relocated,
                failed = failed,
                "Relocation completed"
            );
        }
        RelocationEvent::ValidationFailed { prefix, offending } => {
            error!(
                source = meta.source.as_str(),
                event_id = %meta.event_id,
                prefix = %prefix.display(),
                offending = ?offending,
                "Relocated files still reference the old root"
            );
        }
    }
}

fn log_cache(message: &EventMessage, event: &CacheEvent) {
    let meta = &message.meta;
    match event {
        CacheEvent::PhaseStarted { package, phase } => {
            debug!(
                source = meta.source.as_str(),
                event_id = %meta.event_id,
                package = %package,
                phase = %phase,
                "Phase started"
            );
        }
        CacheEvent::Published {
            package,
            mirror,
            key,
            signed,
        } => {
            info!(
                source = meta.source.as_str(),
                event_id = %meta.event_id,
                package = %package,
                mirror = %mirror,
                key = %key,
                signed = signed,
                "Package published"
            );
        }
        CacheEvent::SignatureSkipped { package, phase } => {
            warn!(
                source = meta.source.as_str(),
                event_id = %meta.event_id,
                package = %package,
                phase = %phase,
                "Signature skipped"
            );
        }
        CacheEvent::Installed {
            package,
            prefix,
            unrelocated,
        } => {
            info!(
                source = meta.source.as_str(),
                event_id = %meta.event_id,
                package = %package,
                prefix = %prefix.display(),
                unrelocated = unrelocated.len(),
                "Package installed"
            );
        }
        CacheEvent::Failed {
            package,
            phase,
            failure,
        } => {
            error!(
                source = meta.source.as_str(),
                event_id = %meta.event_id,
                package = %package,
                phase = %phase,
                retryable = failure.retryable,
                code = ?failure.code,
                error = %failure.message,
                hint = ?failure.hint,
                "Build cache operation failed"
            );
        }
        CacheEvent::SpecCacheRefreshed { mirrors, specs } => {
            debug!(
                source = meta.source.as_str(),
                event_id = %meta.event_id,
                mirrors = mirrors,
                specs = specs,
                "Spec cache refreshed"
            );
        }
        CacheEvent::KeyInstalled { id, path } => {
            info!(
                source = meta.source.as_str(),
                event_id = %meta.event_id,
                key_id = %id,
                path = %path.display(),
                "Public key trusted"
            );
        }
    }
}
