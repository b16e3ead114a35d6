use biometrics::{Collector, Counter, Moments};

pub(crate) static GATEWAY_REQUESTS: Counter = Counter::new("yatri.gateway.requests");
pub(crate) static GATEWAY_REQUEST_ERRORS: Counter = Counter::new("yatri.gateway.request_errors");
pub(crate) static GATEWAY_REFRESHES: Counter = Counter::new("yatri.gateway.refreshes");
pub(crate) static GATEWAY_REFRESH_FAILURES: Counter =
    Counter::new("yatri.gateway.refresh_failures");
pub(crate) static GATEWAY_RETRIES: Counter = Counter::new("yatri.gateway.retries");
pub(crate) static GATEWAY_REQUEST_DURATION: Moments =
    Moments::new("yatri.gateway.request_duration_seconds");

pub(crate) static REALTIME_CONNECTS: Counter = Counter::new("yatri.realtime.connects");
pub(crate) static REALTIME_RECONNECTS: Counter = Counter::new("yatri.realtime.reconnects");
pub(crate) static REALTIME_EVENTS: Counter = Counter::new("yatri.realtime.events");
pub(crate) static REALTIME_PARSE_ERRORS: Counter = Counter::new("yatri.realtime.parse_errors");
pub(crate) static REALTIME_BACKOFF: Moments = Moments::new("yatri.realtime.backoff_seconds");

pub(crate) static STORE_APPENDS: Counter = Counter::new("yatri.store.appends");
pub(crate) static STORE_DUPLICATES: Counter = Counter::new("yatri.store.duplicates");
pub(crate) static STORE_STALE_HISTORY: Counter = Counter::new("yatri.store.stale_history");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&GATEWAY_REQUESTS);
    collector.register_counter(&GATEWAY_REQUEST_ERRORS);
    collector.register_counter(&GATEWAY_REFRESHES);
    collector.register_counter(&GATEWAY_REFRESH_FAILURES);
    collector.register_counter(&GATEWAY_RETRIES);
    collector.register_moments(&GATEWAY_REQUEST_DURATION);

    collector.register_counter(&REALTIME_CONNECTS);
    collector.register_counter(&REALTIME_RECONNECTS);
    collector.register_counter(&REALTIME_EVENTS);
    collector.register_counter(&REALTIME_PARSE_ERRORS);
    collector.register_moments(&REALTIME_BACKOFF);

    collector.register_counter(&STORE_APPENDS);
    collector.register_counter(&STORE_DUPLICATES);
    collector.register_counter(&STORE_STALE_HISTORY);
}
