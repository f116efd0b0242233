use biometrics::{Collector, Counter, Moments};

pub(crate) static CLIENT_REQUESTS: Counter = Counter::new("streamchat.client.requests");
pub(crate) static CLIENT_REQUEST_ERRORS: Counter =
    Counter::new("streamchat.client.request_errors");

pub(crate) static STREAM_BYTES: Counter = Counter::new("streamchat.stream.bytes");
pub(crate) static STREAM_FRAMES: Counter = Counter::new("streamchat.stream.frames");
pub(crate) static STREAM_MALFORMED_FRAMES: Counter =
    Counter::new("streamchat.stream.malformed_frames");
pub(crate) static STREAM_FLUSHES: Counter = Counter::new("streamchat.stream.flushes");
pub(crate) static STREAM_CANCELLED: Counter = Counter::new("streamchat.stream.cancelled");
pub(crate) static STREAM_ERRORS: Counter = Counter::new("streamchat.stream.errors");
pub(crate) static STREAM_RESPONSE_TIME: Moments =
    Moments::new("streamchat.stream.response_seconds");
pub(crate) static STREAM_DURATION: Moments = Moments::new("streamchat.stream.duration_seconds");

pub(crate) static STORE_MUTATIONS: Counter = Counter::new("streamchat.store.mutations");
pub(crate) static STORE_PERSIST_ERRORS: Counter = Counter::new("streamchat.store.persist_errors");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&CLIENT_REQUESTS);
    collector.register_counter(&CLIENT_REQUEST_ERRORS);

    collector.register_counter(&STREAM_BYTES);
    collector.register_counter(&STREAM_FRAMES);
    collector.register_counter(&STREAM_MALFORMED_FRAMES);
    collector.register_counter(&STREAM_FLUSHES);
    collector.register_counter(&STREAM_CANCELLED);
    collector.register_counter(&STREAM_ERRORS);
    collector.register_moments(&STREAM_RESPONSE_TIME);
    collector.register_moments(&STREAM_DURATION);

    collector.register_counter(&STORE_MUTATIONS);
    collector.register_counter(&STORE_PERSIST_ERRORS);
}
