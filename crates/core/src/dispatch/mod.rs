//! Ordered single-consumer dispatch.
//!
//! Producers (encoder callback threads, the control thread) push
//! [`DispatchTask`]s onto one unbounded FIFO; a single worker drains it and
//! runs each task to completion before taking the next. Because every
//! transport call is made from that worker, the transport is never touched
//! concurrently and send order is exactly enqueue order, across video and
//! audio alike.
//!
//! ```text
//!  video encoder ──┐
//!  audio encoder ──┼──> [ T1 | T2 | T3 | ... ] ──> worker ──> Transport
//!  control      ───┘          unbounded FIFO        (one thread)
//! ```
//!
//! ## Shutdown
//!
//! The loop ends when the executor returns [`ControlFlow::Break`] (a stop
//! task ran), on the [`DispatchTask::Shutdown`] sentinel, or once
//! [`DispatchQueue::shutdown`] clears the running flag. The task in
//! progress always finishes; anything still queued is abandoned rather
//! than sent to a closing connection.

mod worker;

pub(crate) use worker::Dispatcher;

use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::{Receiver, Sender};

use crate::media::ClassifiedFrame;
use crate::transport::ConnectParams;

/// One unit of ordered work for the dispatch worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchTask {
    /// Open the transport connection.
    Connect(ConnectParams),
    /// Send one classified frame on the live connection.
    Frame(ClassifiedFrame),
    /// Close the connection and end the loop.
    Stop,
    /// Wake the worker and end the loop without closing anything.
    Shutdown,
}

/// Producer side of the dispatch queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DispatchQueue {
    tx: Sender<DispatchTask>,
    running: Arc<AtomicBool>,
}

/// Consumer side of the dispatch queue, moved onto the worker thread.
#[derive(Debug)]
pub struct DispatchReceiver {
    rx: Receiver<DispatchTask>,
    running: Arc<AtomicBool>,
}

/// Create a connected queue pair.
pub fn queue() -> (DispatchQueue, DispatchReceiver) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let running = Arc::new(AtomicBool::new(true));
    (
        DispatchQueue {
            tx,
            running: running.clone(),
        },
        DispatchReceiver { rx, running },
    )
}

impl DispatchQueue {
    /// Append a task. Never blocks.
    ///
    /// After the worker has exited the task is dropped silently; that is
    /// the documented fate of work enqueued behind a stop.
    pub fn enqueue(&self, task: DispatchTask) {
        if self.tx.send(task).is_err() {
            tracing::trace!("dispatch worker gone, task abandoned");
        }
    }

    /// Ask the worker to exit after its current task, abandoning the rest.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        self.enqueue(DispatchTask::Shutdown);
    }
}

impl DispatchReceiver {
    /// Drain the queue on the current thread until told to stop.
    ///
    /// Blocks while the queue is empty. `execute` runs each task
    /// synchronously; returning [`ControlFlow::Break`] ends the loop.
    pub fn run_loop<F>(self, mut execute: F)
    where
        F: FnMut(DispatchTask) -> ControlFlow<()>,
    {
        while self.running.load(Ordering::Acquire) {
            let task = match self.rx.recv() {
                Ok(task) => task,
                Err(_) => break,
            };

            if matches!(task, DispatchTask::Shutdown) || !self.running.load(Ordering::Acquire) {
                break;
            }

            if execute(task).is_break() {
                break;
            }
        }

        self.running.store(false, Ordering::Release);

        let abandoned = self.rx.len();
        if abandoned > 0 {
            tracing::debug!(abandoned, "dispatch loop exited with pending tasks");
        } else {
            tracing::debug!("dispatch loop exited");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::thread;

    fn audio(ts: i64) -> DispatchTask {
        DispatchTask::Frame(ClassifiedFrame::AudioData {
            frame: Bytes::from_static(&[0xAA; 4]),
            timestamp_ms: ts,
        })
    }

    fn video(ts: i64) -> DispatchTask {
        DispatchTask::Frame(ClassifiedFrame::VideoData {
            nal: Bytes::from_static(&[0, 0, 0, 1, 0x41]),
            keyframe: false,
            timestamp_ms: ts,
        })
    }

    #[test]
    fn executes_in_enqueue_order() {
        let (tx, rx) = queue();
        tx.enqueue(video(1));
        tx.enqueue(audio(1));
        tx.enqueue(video(2));
        tx.enqueue(DispatchTask::Stop);

        let mut seen = Vec::new();
        rx.run_loop(|task| {
            if task == DispatchTask::Stop {
                return ControlFlow::Break(());
            }
            seen.push(task);
            ControlFlow::Continue(())
        });

        assert_eq!(seen, vec![video(1), audio(1), video(2)]);
        assert!(!tx.running.load(Ordering::Acquire));
    }

    #[test]
    fn tasks_after_stop_are_abandoned() {
        let (tx, rx) = queue();
        tx.enqueue(video(1));
        tx.enqueue(DispatchTask::Stop);
        tx.enqueue(video(2));

        let mut executed = 0;
        rx.run_loop(|task| {
            executed += 1;
            if task == DispatchTask::Stop {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });

        assert_eq!(executed, 2);
    }

    #[test]
    fn shutdown_skips_pending_tasks() {
        let (tx, rx) = queue();
        tx.enqueue(video(1));
        tx.enqueue(video(2));
        tx.shutdown();

        let mut executed = 0;
        rx.run_loop(|_| {
            executed += 1;
            ControlFlow::Continue(())
        });

        assert_eq!(executed, 0);
    }

    #[test]
    fn enqueue_after_worker_exit_does_not_fail() {
        let (tx, rx) = queue();
        drop(rx);
        tx.enqueue(video(1));
    }

    #[test]
    fn worker_blocks_until_tasks_arrive() {
        let (tx, rx) = queue();
        let worker = thread::spawn(move || {
            let mut seen = Vec::new();
            rx.run_loop(|task| {
                seen.push(task);
                ControlFlow::Continue(())
            });
            seen
        });

        tx.enqueue(audio(5));
        tx.enqueue(DispatchTask::Shutdown);

        let seen = worker.join().unwrap();
        assert_eq!(seen, vec![audio(5)]);
    }

    #[test]
    fn per_producer_order_survives_interleaving() {
        let (tx, rx) = queue();
        let producers: Vec<_> = [true, false]
            .into_iter()
            .map(|is_video| {
                let tx = tx.clone();
                thread::spawn(move || {
                    for ts in 0..200 {
                        tx.enqueue(if is_video { video(ts) } else { audio(ts) });
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }
        tx.enqueue(DispatchTask::Stop);

        let mut video_ts = Vec::new();
        let mut audio_ts = Vec::new();
        rx.run_loop(|task| match task {
            DispatchTask::Frame(frame @ ClassifiedFrame::VideoData { .. }) => {
                video_ts.push(frame.timestamp_ms());
                ControlFlow::Continue(())
            }
            DispatchTask::Frame(frame) => {
                audio_ts.push(frame.timestamp_ms());
                ControlFlow::Continue(())
            }
            _ => ControlFlow::Break(()),
        });

        let expected: Vec<i64> = (0..200).collect();
        assert_eq!(video_ts, expected);
        assert_eq!(audio_ts, expected);
    }
}
