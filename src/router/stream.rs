//! 流式派发的消费端
//!
//! 生产者在后台任务中把至多一个终止元素写入有界通道；消费端被丢弃或调用 `cancel` 时，
//! 取消令牌触发，生产者随即放弃正在等待的后端调用（连同其未消费完的流）。

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::core::{AgentResponse, RouterError};

pub type StreamItem = Result<AgentResponse, RouterError>;

/// dispatch_stream 返回的响应流
pub struct ResponseStream {
    rx: mpsc::Receiver<StreamItem>,
    token: CancellationToken,
    _guard: DropGuard,
}

impl ResponseStream {
    pub(crate) fn new(rx: mpsc::Receiver<StreamItem>, token: CancellationToken) -> Self {
        Self {
            rx,
            _guard: token.clone().drop_guard(),
            token,
        }
    }

    /// 取消生产者；之后流以 `Err(Cancelled)` 或直接结束
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Stream for ResponseStream {
    type Item = StreamItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
