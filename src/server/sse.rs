//! 任务事件 → SSE
//!
//! 每个事件编码为 `event: <type>\ndata: <json>\n\n`；收到 result 后流结束，
//! 客户端断开时流被丢弃，Subscription 随之退订。

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{self, Stream};

use crate::core::{JobEvent, Subscription};

pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

pub fn to_sse_event(event: &JobEvent) -> Event {
    Event::default()
        .event(event.event_type())
        .data(event.data().to_string())
}

/// 订阅转为事件流：回放、实时事件，直到 result
pub fn job_event_stream(
    subscription: Subscription,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold((subscription, false), |(mut sub, finished)| async move {
        if finished {
            return None;
        }
        let event = sub.next().await?;
        let finished = event.is_result();
        Some((Ok(to_sse_event(&event)), (sub, finished)))
    })
}

pub fn sse_response(
    subscription: Subscription,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    Sse::new(job_event_stream(subscription)).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keepalive"),
    )
}
