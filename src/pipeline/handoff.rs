// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 工作线程 → 显示端 的帧交付
//!
//! 帧通道与结束通知通道分开; 每条消息带会话号,
//! 接收端据此保证 "同一会话的帧先于该会话的结束通知".

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender, TrySendError};

use crate::config::HandoffPolicy;
use crate::frame::Frame;

/// 会话结束原因
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EndReason {
    /// 输入源读完
    Exhausted,
    /// 连续失败超过上限
    TooManyFailures,
    /// 输入源不可恢复的错误 (或工作线程异常)
    Failed(String),
    /// 被 close() 结束
    Closed,
}

/// 显示端收到的事件
#[derive(Clone, Debug)]
pub enum PipelineEvent {
    Frame(Frame),
    StreamEnded(EndReason),
}

/// 显示端 (在消费线程上被调用)
pub trait DisplaySink {
    fn on_frame(&mut self, frame: Frame);

    fn on_stream_ended(&mut self, reason: EndReason);
}

struct Delivery {
    session: u64,
    frame: Frame,
}

/// 控制器持有的交付端
pub(crate) struct Handoff {
    policy: HandoffPolicy,
    frames_tx: Sender<Delivery>,
    /// DropToLatest 模式下用于替换旧帧, close 时用于清空
    frames_rx: Receiver<Delivery>,
    ends_tx: Sender<(u64, EndReason)>,
}

pub(crate) fn channel(policy: HandoffPolicy) -> (Handoff, FrameReceiver) {
    let capacity = match &policy {
        HandoffPolicy::DropToLatest => 1,
        HandoffPolicy::Lossless { capacity } => (*capacity).max(1),
    };
    let (frames_tx, frames_rx) = bounded(capacity);
    let (ends_tx, ends_rx) = unbounded();

    let receiver = FrameReceiver {
        frames: frames_rx.clone(),
        ends: ends_rx,
        stash: VecDeque::new(),
        pending_ends: VecDeque::new(),
    };
    let handoff = Handoff {
        policy,
        frames_tx,
        frames_rx,
        ends_tx,
    };
    (handoff, receiver)
}

impl Handoff {
    pub(crate) fn sender(&self, session: u64, cancel: Receiver<()>) -> FrameSender {
        FrameSender {
            session,
            lossless: matches!(self.policy, HandoffPolicy::Lossless { .. }),
            tx: self.frames_tx.clone(),
            evict: self.frames_rx.clone(),
            cancel,
            ends: self.ends_tx.clone(),
        }
    }

    /// 丢弃尚未被取走的帧, 返回丢弃数量
    pub(crate) fn purge(&self) -> u64 {
        self.frames_rx.try_iter().count() as u64
    }
}

pub(crate) enum SendOutcome {
    /// 已交付; `evicted` 为被替换掉的旧帧数
    Delivered { evicted: u64 },
    /// 阻塞等待期间会话被关闭
    Cancelled,
}

/// 工作线程持有的发送端 (单个会话)
pub(crate) struct FrameSender {
    session: u64,
    lossless: bool,
    tx: Sender<Delivery>,
    evict: Receiver<Delivery>,
    /// close() 丢弃对应 Sender 后立即可读
    cancel: Receiver<()>,
    ends: Sender<(u64, EndReason)>,
}

impl FrameSender {
    pub(crate) fn send(&self, frame: Frame) -> SendOutcome {
        let delivery = Delivery {
            session: self.session,
            frame,
        };
        if self.lossless {
            self.send_blocking(delivery)
        } else {
            self.send_latest(delivery)
        }
    }

    fn send_latest(&self, mut delivery: Delivery) -> SendOutcome {
        let mut evicted = 0;
        loop {
            match self.tx.try_send(delivery) {
                Ok(()) => return SendOutcome::Delivered { evicted },
                Err(TrySendError::Full(back)) => {
                    delivery = back;
                    if self.evict.try_recv().is_ok() {
                        evicted += 1;
                    }
                }
                Err(TrySendError::Disconnected(_)) => return SendOutcome::Cancelled,
            }
        }
    }

    fn send_blocking(&self, delivery: Delivery) -> SendOutcome {
        select! {
            send(self.tx, delivery) -> res => match res {
                Ok(()) => SendOutcome::Delivered { evicted: 0 },
                Err(_) => SendOutcome::Cancelled,
            },
            recv(self.cancel) -> _ => SendOutcome::Cancelled,
        }
    }

    pub(crate) fn end(&self, reason: EndReason) {
        let _ = self.ends.send((self.session, reason));
    }
}

/// 显示端接收器 (单消费者)
pub struct FrameReceiver {
    frames: Receiver<Delivery>,
    ends: Receiver<(u64, EndReason)>,
    stash: VecDeque<Delivery>,
    pending_ends: VecDeque<(u64, EndReason)>,
}

impl FrameReceiver {
    /// 非阻塞地取下一个事件
    pub fn try_recv(&mut self) -> Option<PipelineEvent> {
        self.pending_ends.extend(self.ends.try_iter());

        let next = self.stash.pop_front().or_else(|| self.frames.try_recv().ok());
        if let Some(delivery) = next {
            // 新会话的帧必须排在旧会话的结束通知之后
            self.pending_ends.extend(self.ends.try_iter());
            let newer_session = self
                .pending_ends
                .front()
                .is_some_and(|(session, _)| delivery.session > *session);
            if newer_session {
                self.stash.push_front(delivery);
                return self
                    .pending_ends
                    .pop_front()
                    .map(|(_, reason)| PipelineEvent::StreamEnded(reason));
            }
            return Some(PipelineEvent::Frame(delivery.frame));
        }

        self.pending_ends
            .pop_front()
            .map(|(_, reason)| PipelineEvent::StreamEnded(reason))
    }

    /// 等待下一个事件, 超时返回 None
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<PipelineEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(event) = self.try_recv() {
                return Some(event);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }

            select! {
                recv(self.frames) -> msg => match msg {
                    Ok(delivery) => self.stash.push_back(delivery),
                    Err(_) => return self.try_recv(),
                },
                recv(self.ends) -> msg => match msg {
                    Ok(end) => self.pending_ends.push_back(end),
                    Err(_) => return self.try_recv(),
                },
                default(remaining) => return None,
            }
        }
    }

    /// 等待并把一个事件交给显示端, 返回是否有事件
    pub fn dispatch<S: DisplaySink + ?Sized>(&mut self, sink: &mut S, timeout: Duration) -> bool {
        match self.recv_timeout(timeout) {
            Some(event) => {
                deliver(sink, event);
                true
            }
            None => false,
        }
    }

    /// 把当前已就绪的全部事件交给显示端 (不阻塞), 返回事件数
    pub fn pump<S: DisplaySink + ?Sized>(&mut self, sink: &mut S) -> usize {
        let mut count = 0;
        while let Some(event) = self.try_recv() {
            deliver(sink, event);
            count += 1;
        }
        count
    }
}

fn deliver<S: DisplaySink + ?Sized>(sink: &mut S, event: PipelineEvent) {
    match event {
        PipelineEvent::Frame(frame) => sink.on_frame(frame),
        PipelineEvent::StreamEnded(reason) => sink.on_stream_ended(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(index: u64) -> Frame {
        Frame::filled(2, 2, [0, 0, 0], index)
    }

    fn frame_index(event: Option<PipelineEvent>) -> u64 {
        match event {
            Some(PipelineEvent::Frame(frame)) => frame.index(),
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[test]
    fn test_drop_to_latest_replaces_pending() {
        let (handoff, mut rx) = channel(HandoffPolicy::DropToLatest);
        let (_cancel_tx, cancel_rx) = bounded(0);
        let sender = handoff.sender(1, cancel_rx);

        assert!(matches!(sender.send(frame(0)), SendOutcome::Delivered { evicted: 0 }));
        assert!(matches!(sender.send(frame(1)), SendOutcome::Delivered { evicted: 1 }));

        assert_eq!(frame_index(rx.try_recv()), 1);
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_lossless_keeps_every_frame() {
        let (handoff, mut rx) = channel(HandoffPolicy::Lossless { capacity: 4 });
        let (_cancel_tx, cancel_rx) = bounded(0);
        let sender = handoff.sender(1, cancel_rx);

        for i in 0..3 {
            sender.send(frame(i));
        }
        for i in 0..3 {
            assert_eq!(frame_index(rx.try_recv()), i);
        }
    }

    #[test]
    fn test_lossless_send_cancelled() {
        let (handoff, _rx) = channel(HandoffPolicy::Lossless { capacity: 1 });
        let (cancel_tx, cancel_rx) = bounded::<()>(0);
        let sender = handoff.sender(1, cancel_rx);
        sender.send(frame(0));

        let blocked = std::thread::spawn(move || sender.send(frame(1)));
        std::thread::sleep(Duration::from_millis(50));
        drop(cancel_tx);

        assert!(matches!(blocked.join().unwrap(), SendOutcome::Cancelled));
    }

    #[test]
    fn test_end_follows_frames_of_same_session() {
        let (handoff, mut rx) = channel(HandoffPolicy::Lossless { capacity: 4 });
        let (_c1, cancel1) = bounded(0);
        let first = handoff.sender(1, cancel1);
        first.send(frame(0));
        first.end(EndReason::Exhausted);

        let (_c2, cancel2) = bounded(0);
        let second = handoff.sender(2, cancel2);
        second.send(frame(0));

        assert_eq!(frame_index(rx.try_recv()), 0);
        assert!(matches!(
            rx.try_recv(),
            Some(PipelineEvent::StreamEnded(EndReason::Exhausted))
        ));
        assert_eq!(frame_index(rx.try_recv()), 0);
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_purge() {
        let (handoff, mut rx) = channel(HandoffPolicy::Lossless { capacity: 4 });
        let (_c, cancel) = bounded(0);
        let sender = handoff.sender(1, cancel);
        sender.send(frame(0));
        sender.send(frame(1));

        assert_eq!(handoff.purge(), 2);
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_recv_timeout_empty() {
        let (_handoff, mut rx) = channel(HandoffPolicy::DropToLatest);
        let start = Instant::now();
        assert!(rx.recv_timeout(Duration::from_millis(30)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
