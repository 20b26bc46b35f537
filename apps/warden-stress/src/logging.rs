//! Tracing setup and event forwarding
//!
//! Library crates emit typed events; this module turns them into tracing
//! records with structured fields so they end up in the same output as the
//! crates' own log lines.

use tracing::{debug, error, trace, warn};
use tracing_subscriber::EnvFilter;
use warden_events::{AppEvent, EventMessage, GeneralEvent, JobEvent, RegistryEvent};

/// Install the global subscriber
///
/// `RUST_LOG` wins over the configured filter; `--debug` raises warden
/// crates to debug level.
pub fn init_tracing(json: bool, debug_enabled: bool, configured_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug_enabled {
            EnvFilter::new("info,warden=debug,warden_resources=debug,warden_jobs=debug")
        } else {
            EnvFilter::new(configured_filter)
        }
    });

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_thread_names(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .init();
    }
}

/// Log an event with structured fields for its domain
pub fn log_event_with_tracing(message: &EventMessage) {
    let meta = &message.meta;
    match &message.event {
        AppEvent::Registry(event) => match event {
            RegistryEvent::Registered {
                id,
                parent,
                ptr,
                kind,
            } => trace!(
                source = meta.source.as_str(),
                resource = %id,
                parent = %parent,
                ptr = %ptr,
                kind = %kind,
                "registered"
            ),
            RegistryEvent::Disposed {
                id,
                kind,
                trigger,
                children,
            } => trace!(
                source = meta.source.as_str(),
                resource = %id,
                kind = %kind,
                trigger = trigger.as_str(),
                children,
                "disposed"
            ),
        },

        AppEvent::Job(event) => match event {
            JobEvent::Queued {
                job,
                label,
                resources,
            } => debug!(job = %job, label = %label, resources = ?resources, "job queued"),
            JobEvent::Started { job, label, mode } => {
                debug!(job = %job, label = %label, mode = ?mode, "job started");
            }
            JobEvent::Completed {
                job,
                label,
                duration,
            } => debug!(
                correlation = ?meta.correlation_id,
                job = %job,
                label = %label,
                duration_ms = duration.as_millis(),
                "job completed"
            ),
            JobEvent::Failed {
                job,
                label,
                failure,
            } => {
                if failure.code.as_deref() == Some("resource.gone") {
                    debug!(job = %job, label = %label, message = %failure.message, "job target gone");
                } else {
                    error!(
                        job = %job,
                        label = %label,
                        code = ?failure.code,
                        message = %failure.message,
                        hint = ?failure.hint,
                        "job failed"
                    );
                }
            }
            JobEvent::ControllerBlocked {
                job,
                label,
                resources,
                waited,
            } => warn!(
                job = %job,
                label = %label,
                resources = ?resources,
                waited_ms = waited.as_millis(),
                "controller blocked"
            ),
        },

        AppEvent::General(event) => match event {
            GeneralEvent::Warning { message, context } => {
                warn!(context = ?context, "{message}");
            }
            GeneralEvent::Error { message, details } => {
                error!(details = ?details, "{message}");
            }
            GeneralEvent::DebugLog { message, context } => {
                debug!(context = ?context, "{message}");
            }
        },
    }
}
