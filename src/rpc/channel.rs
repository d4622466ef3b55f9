//! One-direction ordered message pipe for a single call
//!
//! The sending half closes the direction explicitly (half-close) or by being
//! dropped. The receiving half drains buffered messages before it reports end
//! of stream. Both halves give up as soon as the call's context ends.

use thiserror::Error;
use tokio::sync::mpsc;

use crate::errors::Status;
use crate::rpc::context::{CallContext, ContextError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelCapacity {
    Bounded(usize),
    Unbounded,
}

impl ChannelCapacity {
    /// `0` selects an unbounded channel.
    pub fn from_config(capacity: usize) -> Self {
        if capacity == 0 {
            Self::Unbounded
        } else {
            Self::Bounded(capacity)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("channel is closed for sending")]
    ChannelClosed,
    #[error("receiving side has terminated the call")]
    PeerGone,
    #[error("channel was already closed")]
    AlreadyClosed,
    #[error(transparent)]
    Context(#[from] ContextError),
}

impl From<ChannelError> for Status {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Context(err) => err.into(),
            ChannelError::PeerGone => Status::cancelled(err.to_string()),
            ChannelError::ChannelClosed | ChannelError::AlreadyClosed => Status::internal(err),
        }
    }
}

#[derive(Debug)]
enum Outbound<T> {
    Bounded(mpsc::Sender<T>),
    Unbounded(mpsc::UnboundedSender<T>),
}

#[derive(Debug)]
enum Inbound<T> {
    Bounded(mpsc::Receiver<T>),
    Unbounded(mpsc::UnboundedReceiver<T>),
}

impl<T> Inbound<T> {
    async fn recv(&mut self) -> Option<T> {
        match self {
            Self::Bounded(rx) => rx.recv().await,
            Self::Unbounded(rx) => rx.recv().await,
        }
    }

    fn close(&mut self) {
        match self {
            Self::Bounded(rx) => rx.close(),
            Self::Unbounded(rx) => rx.close(),
        }
    }
}

#[derive(Debug)]
pub struct MessageSender<T> {
    outbound: Option<Outbound<T>>,
    context: CallContext,
    sent: u64,
}

#[derive(Debug)]
pub struct MessageReceiver<T> {
    inbound: Inbound<T>,
    context: CallContext,
    received: u64,
}

pub fn channel<T>(
    context: &CallContext,
    capacity: ChannelCapacity,
) -> (MessageSender<T>, MessageReceiver<T>) {
    let (outbound, inbound) = match capacity {
        ChannelCapacity::Bounded(size) => {
            let (tx, rx) = mpsc::channel(size.max(1));
            (Outbound::Bounded(tx), Inbound::Bounded(rx))
        }
        ChannelCapacity::Unbounded => {
            let (tx, rx) = mpsc::unbounded_channel();
            (Outbound::Unbounded(tx), Inbound::Unbounded(rx))
        }
    };

    (
        MessageSender {
            outbound: Some(outbound),
            context: context.clone(),
            sent: 0,
        },
        MessageReceiver {
            inbound,
            context: context.clone(),
            received: 0,
        },
    )
}

impl<T> MessageSender<T> {
    /// Appends `message` to the channel. On a bounded channel this waits for
    /// room, racing the call context.
    pub async fn send(&mut self, message: T) -> Result<(), ChannelError> {
        let Some(outbound) = self.outbound.as_ref() else {
            return Err(ChannelError::ChannelClosed);
        };
        if let Some(err) = self.context.error() {
            return Err(err.into());
        }

        match outbound {
            Outbound::Unbounded(tx) => tx.send(message).map_err(|_| ChannelError::PeerGone)?,
            Outbound::Bounded(tx) => {
                tokio::select! {
                    biased;
                    err = self.context.done() => return Err(err.into()),
                    sent = tx.send(message) => sent.map_err(|_| ChannelError::PeerGone)?,
                }
            }
        }

        self.sent += 1;
        Ok(())
    }

    /// Half-closes this direction. Only the first call succeeds.
    pub fn close(&mut self) -> Result<(), ChannelError> {
        self.outbound
            .take()
            .map(drop)
            .ok_or(ChannelError::AlreadyClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_none()
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }
}

impl<T> MessageReceiver<T> {
    /// Next message in send order, `None` once the sender has closed and the
    /// buffer is drained.
    pub async fn recv(&mut self) -> Result<Option<T>, ContextError> {
        if let Some(err) = self.context.error() {
            return Err(err);
        }

        let next = tokio::select! {
            biased;
            err = self.context.done() => return Err(err),
            next = self.inbound.recv() => next,
        };

        if next.is_some() {
            self.received += 1;
        }
        Ok(next)
    }

    /// Stops accepting new messages; already buffered ones can still be
    /// drained. Subsequent sends fail with [`ChannelError::PeerGone`].
    pub fn close(&mut self) {
        self.inbound.close();
    }

    pub fn received(&self) -> u64 {
        self.received
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn delivers_in_send_order_then_end_of_stream() {
        let context = CallContext::background();
        let (mut tx, mut rx) = channel(&context, ChannelCapacity::Unbounded);

        for value in 0..5 {
            tx.send(value).await.expect("send");
        }
        tx.close().expect("close");

        let mut received = Vec::new();
        while let Some(value) = rx.recv().await.expect("recv") {
            received.push(value);
        }

        assert_eq!(received, vec![0, 1, 2, 3, 4]);
        assert_eq!(rx.recv().await, Ok(None));
        assert_eq!(rx.received(), 5);
    }

    #[tokio::test]
    async fn second_close_fails_without_losing_messages() {
        let context = CallContext::background();
        let (mut tx, mut rx) = channel(&context, ChannelCapacity::Bounded(4));

        tx.send("a").await.expect("send");
        tx.close().expect("first close");

        assert_eq!(tx.close(), Err(ChannelError::AlreadyClosed));
        assert_eq!(tx.send("b").await, Err(ChannelError::ChannelClosed));
        assert_eq!(rx.recv().await, Ok(Some("a")));
        assert_eq!(rx.recv().await, Ok(None));
    }

    #[tokio::test]
    async fn send_fails_once_receiver_is_gone() {
        let context = CallContext::background();
        let (mut tx, rx) = channel::<u32>(&context, ChannelCapacity::Bounded(1));
        drop(rx);

        assert_eq!(tx.send(1).await, Err(ChannelError::PeerGone));
        assert_eq!(tx.sent(), 0);
    }

    #[tokio::test]
    async fn closed_receiver_drains_buffer_and_rejects_new_sends() {
        let context = CallContext::background();
        let (mut tx, mut rx) = channel(&context, ChannelCapacity::Unbounded);

        tx.send(7).await.expect("send");
        rx.close();

        assert_eq!(tx.send(8).await, Err(ChannelError::PeerGone));
        assert_eq!(rx.recv().await, Ok(Some(7)));
        assert_eq!(rx.recv().await, Ok(None));
    }

    #[tokio::test]
    async fn cancel_wakes_a_pending_receive() {
        let context = CallContext::background();
        let (_tx, mut rx) = channel::<u32>(&context, ChannelCapacity::Unbounded);

        let pending = tokio::spawn(async move { rx.recv().await });
        tokio::task::yield_now().await;
        context.cancel();

        assert_eq!(pending.await.expect("join"), Err(ContextError::Cancelled));
    }

    #[tokio::test]
    async fn sends_after_cancel_are_rejected() {
        let context = CallContext::background();
        let (mut tx, mut rx) = channel(&context, ChannelCapacity::Unbounded);

        tx.send(1).await.expect("send");
        context.cancel();

        assert_eq!(
            tx.send(2).await,
            Err(ChannelError::Context(ContextError::Cancelled))
        );
        assert_eq!(rx.recv().await, Err(ContextError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn full_bounded_channel_send_gives_up_at_deadline() {
        let context = CallContext::background().with_timeout(Duration::from_secs(1));
        let (mut tx, _rx) = channel(&context, ChannelCapacity::Bounded(1));

        tx.send(1).await.expect("first send fits");

        assert_eq!(
            tx.send(2).await,
            Err(ChannelError::Context(ContextError::DeadlineExceeded))
        );
    }

    #[test]
    fn zero_capacity_means_unbounded() {
        assert_eq!(ChannelCapacity::from_config(0), ChannelCapacity::Unbounded);
        assert_eq!(ChannelCapacity::from_config(8), ChannelCapacity::Bounded(8));
    }
}
