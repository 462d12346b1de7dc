use tracing::info_span;

pub fn span_for_feed(action: &'static str, agent_host: &str) -> tracing::Span {
    info_span!("symphony.feed", action, agent_host, datafeed_id = tracing::field::Empty)
}

pub fn span_for_message(action: &'static str, stream_id: &str, message_id: &str) -> tracing::Span {
    info_span!("symphony.message", action, stream_id, message_id)
}

pub fn span_for_send(action: &'static str, stream_id: &str) -> tracing::Span {
    info_span!("symphony.send", action, stream_id)
}
