//! Channels (spec §4.D).
//!
//! Rendezvous-by-default, capacity-bounded when created with a buffer size.
//! Built on `tokio::sync::mpsc` the way the teacher's `asyncio.rs` built its
//! queues on the async runtime's primitives rather than hand-rolling wakers;
//! here the `LocalSet` scheduler (see `task.rs`) means everything stays
//! single-threaded, so an `Rc<RefCell<..>>` wrapper over the channel halves
//! is enough — no `Arc`/`Mutex` needed.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    rc::Rc,
};

use crate::value::Value;

/// Monotonic id, used only for tracing/display — not part of equality.
fn next_channel_id() -> u64 {
    thread_local! {
        static NEXT: Cell<u64> = const { Cell::new(0) };
    }
    NEXT.with(|n| {
        let id = n.get();
        n.set(id + 1);
        id
    })
}

#[derive(Debug)]
struct ChannelState {
    /// `None` means unbounded rendezvous (capacity 0: every send blocks until
    /// a matching receive); `Some(n)` bounds the buffer at `n` (spec §4.D).
    capacity: Option<usize>,
    queue: VecDeque<Value>,
    closed: bool,
    /// Wakers for receivers blocked on an empty, open channel.
    recv_wakers: Vec<std::task::Waker>,
    /// Wakers for senders blocked on a full, bounded channel.
    send_wakers: Vec<std::task::Waker>,
}

/// A handle to one channel. Cloning shares the same underlying queue — spec
/// §4.D channels are reference types, compared by identity under `==`.
#[derive(Debug, Clone)]
pub struct Channel {
    id: u64,
    state: Rc<RefCell<ChannelState>>,
}

impl Channel {
    #[must_use]
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            id: next_channel_id(),
            state: Rc::new(RefCell::new(ChannelState {
                capacity,
                queue: VecDeque::new(),
                closed: false,
                recv_wakers: Vec::new(),
                send_wakers: Vec::new(),
            })),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn is_same(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    /// Enqueues `value` immediately if there's room, otherwise suspends the
    /// caller until a receiver drains the queue (spec §4.D FIFO + blocking
    /// send on a full/rendezvous channel).
    pub fn send(&self, value: Value) -> SendFuture {
        SendFuture { channel: self.clone(), value: Some(value) }
    }

    /// Suspends until a value is available or the channel is closed.
    pub fn receive(&self) -> ReceiveFuture {
        ReceiveFuture { channel: self.clone() }
    }

    /// Non-blocking receive: `Some(Some(v))` on a value, `Some(None)` on a
    /// closed+drained channel, `None` if nothing is ready yet (spec §4.D
    /// `try_receive`, backing `<-? ch`).
    #[must_use]
    pub fn try_receive(&self) -> Option<Option<Value>> {
        let mut state = self.state.borrow_mut();
        if let Some(v) = state.queue.pop_front() {
            wake_all(&mut state.send_wakers);
            return Some(Some(v));
        }
        if state.closed {
            return Some(None);
        }
        None
    }

    /// Whether a sender is currently blocked waiting for room (rendezvous
    /// with no receiver yet, or a full bounded queue) — distinguishes the
    /// `:pending` status from plain `:empty` for `try_receive` (spec §4.D).
    #[must_use]
    pub fn has_waiting_sender(&self) -> bool {
        !self.state.borrow().send_wakers.is_empty()
    }

    /// Closes the channel; any blocked receivers observe the close once the
    /// queue drains (spec §4.D "receive on a closed, empty channel yields a
    /// distinguishable closed status").
    pub fn close(&self) {
        let mut state = self.state.borrow_mut();
        state.closed = true;
        wake_all(&mut state.recv_wakers);
        wake_all(&mut state.send_wakers);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }
}

fn wake_all(wakers: &mut Vec<std::task::Waker>) {
    for waker in wakers.drain(..) {
        waker.wake();
    }
}

pub struct SendFuture {
    channel: Channel,
    value: Option<Value>,
}

impl std::future::Future for SendFuture {
    type Output = Result<(), crate::error::UniError>;

    fn poll(self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<Self::Output> {
        let this = self.get_mut();
        let mut state = this.channel.state.borrow_mut();
        if state.closed {
            return std::task::Poll::Ready(Err(crate::error::UniError::channel("send on a closed channel")));
        }
        // A `None` capacity means pure rendezvous (spec §4.D): a send only
        // has room once a receiver is already parked waiting, never
        // unconditionally — otherwise it'd behave as an unbounded queue.
        let room = match state.capacity {
            Some(cap) => state.queue.len() < cap.max(1),
            None => !state.recv_wakers.is_empty(),
        };
        if room {
            let value = this.value.take().expect("SendFuture polled after completion");
            state.queue.push_back(value);
            wake_all(&mut state.recv_wakers);
            return std::task::Poll::Ready(Ok(()));
        }
        state.send_wakers.push(cx.waker().clone());
        std::task::Poll::Pending
    }
}

pub struct ReceiveFuture {
    channel: Channel,
}

/// `None` marks a closed, drained channel (spec §4.D receive-status shape).
impl std::future::Future for ReceiveFuture {
    type Output = Option<Value>;

    fn poll(self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<Self::Output> {
        let this = self.get_mut();
        let mut state = this.channel.state.borrow_mut();
        if let Some(v) = state.queue.pop_front() {
            wake_all(&mut state.send_wakers);
            return std::task::Poll::Ready(Some(v));
        }
        if state.closed {
            return std::task::Poll::Ready(None);
        }
        state.recv_wakers.push(cx.waker().clone());
        std::task::Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendezvous_send_is_pending_until_a_receiver_is_waiting() {
        use std::{future::Future, task::{Context, Poll, Waker}};

        let ch = Channel::new(None);
        let mut send_fut = Box::pin(ch.send(Value::Number(1.0)));
        let waker = Waker::noop();
        let mut cx = Context::from_waker(waker);
        assert!(matches!(send_fut.as_mut().poll(&mut cx), Poll::Pending), "send must block with no receiver waiting");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn rendezvous_send_completes_after_receive() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let ch = Channel::new(None);
                let ch2 = ch.clone();
                let sender = tokio::task::spawn_local(async move { ch2.send(Value::Number(1.0)).await });
                let received = ch.receive().await;
                assert_eq!(received, Some(Value::Number(1.0)));
                sender.await.unwrap().unwrap();
            })
            .await;
    }

    #[tokio::test]
    async fn try_receive_reports_closed_after_drain() {
        let ch = Channel::new(Some(4));
        ch.send(Value::Bool(true)).await.unwrap();
        ch.close();
        assert_eq!(ch.try_receive(), Some(Some(Value::Bool(true))));
        assert_eq!(ch.try_receive(), Some(None));
    }
}
