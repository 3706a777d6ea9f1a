//! Structured key/value hooks for rule applications.
//!
//! Wire these to a subscriber in the embedding compiler; the driver only
//! emits events.

#[cfg(feature = "metrics")]
pub fn emit_span(event: &str, key_values: &[(&str, String)]) {
    let span = tracing::trace_span!("xqopt", event = %event);
    let _entered = span.enter();
    for (k, v) in key_values {
        tracing::trace!(%k, %v, "metric");
    }
}

#[cfg(not(feature = "metrics"))]
pub fn emit_span(_event: &str, _key_values: &[(&str, String)]) {}
