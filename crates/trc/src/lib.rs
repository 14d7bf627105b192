//! Structured, leveled event logging for the DANE verification engine.
//!
//! Deliberately minimal: no IPC transport, no proc-macro event catalogue —
//! just the call-site idiom (`trc::event!(Dane(DaneEvent::Variant), field =
//! value, ...)`), named fields, and a pluggable [`Collector`] a host
//! application can swap in to route events into its own observability
//! stack.
//!
//! Call sites never construct [`Event`] directly; use the [`event!`] macro.

use std::fmt;
use std::sync::OnceLock;

use compact_str::CompactString;
use parking_lot::RwLock;

/// Severity of a logged event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Top-level event category. DANE is currently the only category this
/// crate's call sites raise; the enum is kept open so a host application
/// embedding this library can route other subsystems through the same
/// collector without a breaking change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Dane(DaneEvent),
}

impl EventType {
    pub fn level(&self) -> Level {
        match self {
            EventType::Dane(e) => e.level(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EventType::Dane(e) => e.name(),
        }
    }
}

/// Events raised by the TLSA store, matcher, synthesizer, verification
/// driver, post-hook and name checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaneEvent {
    /// A `TlsaStore::add_tlsa` call accepted a new record.
    RecordAdded,
    /// A `TlsaStore::add_tlsa` call was a no-op duplicate.
    RecordDuplicate,
    /// A `TlsaStore::add_tlsa` call was rejected as malformed.
    RecordRejected,
    /// The matcher found no match for a given certificate/selector set.
    NoMatch,
    /// The matcher matched a usage-3/1 record against the full certificate.
    MatchedCert,
    /// The matcher matched a usage-3/1 record against the SPKI.
    MatchedPKey,
    /// Trust-anchor synthesis promoted a peer-supplied certificate to a
    /// trust anchor (`wrap_cert`).
    TrustAnchorWrapCert,
    /// Trust-anchor synthesis manufactured a synthetic CA around a bare
    /// key (`wrap_key`).
    TrustAnchorWrapKey,
    /// Trust-anchor synthesis failed to find any usable anchor.
    TrustAnchorNotFound,
    /// The underlying chain builder was invoked.
    ChainBuildStarted,
    /// The underlying chain builder succeeded.
    ChainBuildSucceeded,
    /// The underlying chain builder failed.
    ChainBuildFailed,
    /// The DANE-EE fast path short-circuited verification.
    DaneEeShortCircuit,
    /// The post-hook's usage-0/1 constraint check failed.
    ChainUntrusted,
    /// The name checker found a matching reference identity.
    HostnameMatched,
    /// The name checker found no matching reference identity.
    HostnameMismatch,
    /// Overall verification succeeded.
    AuthenticationSuccess,
    /// Overall verification failed.
    AuthenticationFailure,
    /// `library_init` ran (idempotently) and reports its support level.
    LibraryInit,
}

impl DaneEvent {
    pub fn level(&self) -> Level {
        use DaneEvent::*;
        match self {
            RecordAdded | RecordDuplicate | MatchedCert | MatchedPKey | ChainBuildStarted
            | ChainBuildSucceeded | DaneEeShortCircuit | HostnameMatched
            | AuthenticationSuccess | LibraryInit | TrustAnchorWrapCert | TrustAnchorWrapKey => {
                Level::Info
            }
            NoMatch | TrustAnchorNotFound => Level::Debug,
            RecordRejected | ChainBuildFailed | ChainUntrusted | HostnameMismatch
            | AuthenticationFailure => Level::Warn,
        }
    }

    pub fn name(&self) -> &'static str {
        use DaneEvent::*;
        match self {
            RecordAdded => "dane.record_added",
            RecordDuplicate => "dane.record_duplicate",
            RecordRejected => "dane.record_rejected",
            NoMatch => "dane.no_match",
            MatchedCert => "dane.matched_cert",
            MatchedPKey => "dane.matched_pkey",
            TrustAnchorWrapCert => "dane.ta_wrap_cert",
            TrustAnchorWrapKey => "dane.ta_wrap_key",
            TrustAnchorNotFound => "dane.ta_not_found",
            ChainBuildStarted => "dane.chain_build_started",
            ChainBuildSucceeded => "dane.chain_build_succeeded",
            ChainBuildFailed => "dane.chain_build_failed",
            DaneEeShortCircuit => "dane.ee_short_circuit",
            ChainUntrusted => "dane.chain_untrusted",
            HostnameMatched => "dane.hostname_matched",
            HostnameMismatch => "dane.hostname_mismatch",
            AuthenticationSuccess => "dane.auth_success",
            AuthenticationFailure => "dane.auth_failure",
            LibraryInit => "dane.library_init",
        }
    }
}

/// A single structured field attached to an event.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: &'static str,
    pub value: CompactString,
}

/// A fully materialized event, ready for a [`Collector`].
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventType,
    pub fields: Vec<Field>,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind.level(), self.kind.name())?;
        for field in &self.fields {
            write!(f, " {}={}", field.name, field.value)?;
        }
        Ok(())
    }
}

/// Receives events produced by the [`event!`] macro. The default collector
/// writes to stderr; a host application can install its own to route
/// events into its own observability stack.
pub trait Collector: Send + Sync + 'static {
    fn collect(&self, event: Event);
}

struct StderrCollector;

impl Collector for StderrCollector {
    fn collect(&self, event: Event) {
        eprintln!("{event}");
    }
}

static COLLECTOR: OnceLock<RwLock<Box<dyn Collector>>> = OnceLock::new();

fn collector() -> &'static RwLock<Box<dyn Collector>> {
    COLLECTOR.get_or_init(|| RwLock::new(Box::new(StderrCollector)))
}

/// Installs a custom collector, replacing the default stderr collector.
/// May be called more than once; the most recent call wins.
pub fn set_collector(collector: Box<dyn Collector>) {
    *self::collector().write() = collector;
}

/// Dispatches an already-built event to the installed collector. Called by
/// the [`event!`] macro; not normally invoked directly.
pub fn dispatch(event: Event) {
    self::collector().read().collect(event);
}

/// Logs a structured event.
///
/// ```ignore
/// trc::event!(
///     Dane(DaneEvent::AuthenticationSuccess),
///     SpanId = session_id,
///     Hostname = hostname.to_string(),
/// );
/// ```
#[macro_export]
macro_rules! event {
    ($variant:ident($value:expr) $(, $field:ident = $data:expr)* $(,)?) => {{
        let fields = vec![$(
            $crate::Field {
                name: stringify!($field),
                value: ::compact_str::format_compact!("{}", $data),
            }
        ),*];
        $crate::dispatch($crate::Event {
            kind: $crate::EventType::$variant($value),
            fields,
        });
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct CapturingCollector(Arc<Mutex<Vec<Event>>>);

    impl Collector for CapturingCollector {
        fn collect(&self, event: Event) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[test]
    fn event_macro_builds_expected_fields() {
        let captured = Arc::new(Mutex::new(Vec::new()));
        set_collector(Box::new(CapturingCollector(captured.clone())));

        event!(
            Dane(DaneEvent::HostnameMatched),
            Hostname = "example.com",
            SpanId = 42,
        );

        let events = captured.lock().unwrap();
        assert_eq!(events.len(), 1);
        let ev = &events[0];
        assert_eq!(ev.kind.name(), "dane.hostname_matched");
        assert_eq!(ev.fields[0].name, "Hostname");
        assert_eq!(ev.fields[0].value, "example.com");
        assert_eq!(ev.fields[1].name, "SpanId");
        assert_eq!(ev.fields[1].value, "42");

        // restore default so other tests in the binary aren't affected
        set_collector(Box::new(StderrCollector));
    }

    #[test]
    fn level_classification_matches_severity() {
        assert_eq!(DaneEvent::AuthenticationSuccess.level(), Level::Info);
        assert_eq!(DaneEvent::AuthenticationFailure.level(), Level::Warn);
        assert_eq!(DaneEvent::NoMatch.level(), Level::Debug);
    }
}
