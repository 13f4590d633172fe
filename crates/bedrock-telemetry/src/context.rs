//! Process-wide span context.

use tracing::{Span, span::Entered};

use crate::init::build_sha;

/// Guard that keeps the service-level span entered for the lifetime of the process.
pub struct GlobalContextGuard {
    span: &'static Span,
    _guard: Entered<'static>,
}

impl GlobalContextGuard {
    /// Enter the service span, tagging it with `service` and the build SHA.
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        let service = service.into();
        let span: &'static Span = Box::leak(Box::new(tracing::info_span!(
            "bedrock",
            service = %service,
            build_sha = %build_sha(),
            diagnostic_id = tracing::field::Empty,
        )));
        Self {
            span,
            _guard: span.enter(),
        }
    }

    /// Record the telemetry identifier on the service span, whichever span
    /// the caller is currently inside.
    pub fn record_diagnostic_id(&self, id: &str) {
        self.span.record("diagnostic_id", tracing::field::display(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            self.0
                .lock()
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_default()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if let Ok(mut bytes) = self.0.lock() {
                bytes.extend_from_slice(buf);
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn diagnostic_id_lands_on_service_span_from_nested_span() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let guard = GlobalContextGuard::new("bootstrap");
            {
                let _request = tracing::info_span!("request", route = "/ping").entered();
                guard.record_diagnostic_id("abc123");
            }
            tracing::info!("ready");
            drop(guard);
        });

        let output = captured.text();
        let ready = output
            .lines()
            .find(|line| line.contains("ready"))
            .unwrap_or_default();
        assert!(ready.contains("bedrock{"), "{output}");
        assert!(ready.contains("diagnostic_id=abc123"), "{output}");
    }
}
