//! Single-in-flight send queues
//!
//! A [`TransportQueue`] decides *what* goes on the wire next; the writer task
//! owning the socket half does the actual I/O. The contract is:
//!
//! - [`TransportQueue::enqueue`] returns the bytes to transmit right away
//!   when nothing is in flight, otherwise parks them and returns `None`.
//! - [`TransportQueue::complete`] is called by the writer after each
//!   transmission. It returns the next batch, coalescing queued frames up to
//!   the batch budget when coalescing is enabled, or clears the in-flight
//!   flag when the queue is empty.
//!
//! Together these guarantee at most one outstanding transmission per
//! transport, and that frames leave in the order they were enqueued.

use crate::buffer_pool::BufferPool;
use bytes::BytesMut;
use log::warn;
use std::collections::VecDeque;

#[derive(Debug)]
pub struct TransportQueue {
    queue: VecDeque<BytesMut>,
    in_flight: bool,
    batch_budget: usize,
    coalesce: bool,
    dropped: u64,
}

impl TransportQueue {
    pub fn new(batch_budget: usize, coalesce: bool) -> Self {
        Self {
            queue: VecDeque::new(),
            in_flight: false,
            batch_budget,
            coalesce,
            dropped: 0,
        }
    }

    pub fn enqueue(&mut self, frame: BytesMut) -> Option<BytesMut> {
        if self.in_flight {
            self.queue.push_back(frame);
            None
        } else {
            self.in_flight = true;
            Some(frame)
        }
    }

    pub fn complete(&mut self, pool: &BufferPool) -> Option<BytesMut> {
        let next = if self.coalesce {
            self.combine_while_fits(pool)
        } else {
            self.queue.pop_front()
        };
        if next.is_none() {
            self.in_flight = false;
        }
        next
    }

    /// Concatenates queued frames, oldest first, while they fit the budget
    ///
    /// A frame that alone exceeds the budget is dropped with a warning when
    /// it is at the head of an empty batch; otherwise it ends the batch and
    /// waits for the next one.
    fn combine_while_fits(&mut self, pool: &BufferPool) -> Option<BytesMut> {
        let mut batch: Option<BytesMut> = None;

        while let Some(front) = self.queue.front() {
            let used = batch.as_ref().map_or(0, |b| b.len());
            if used + front.len() > self.batch_budget {
                if batch.is_none() {
                    if let Some(dropped) = self.queue.pop_front() {
                        warn!(
                            "Dropping queued frame of {} bytes, larger than batch budget {}",
                            dropped.len(),
                            self.batch_budget
                        );
                        self.dropped += 1;
                        pool.release(dropped);
                    }
                    continue;
                }
                break;
            }

            let Some(frame) = self.queue.pop_front() else {
                break;
            };
            match batch.as_mut() {
                None => {
                    let mut first = pool.acquire();
                    first.extend_from_slice(&frame);
                    pool.release(frame);
                    batch = Some(first);
                }
                Some(buf) => {
                    buf.extend_from_slice(&frame);
                    pool.release(frame);
                }
            }
        }

        batch
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn is_idle(&self) -> bool {
        !self.in_flight && self.queue.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(byte: u8, len: usize) -> BytesMut {
        BytesMut::from(&vec![byte; len][..])
    }

    #[test]
    fn test_first_send_goes_out_immediately() {
        let mut queue = TransportQueue::new(64, true);
        let out = queue.enqueue(frame(1, 4));
        assert_eq!(out.as_deref(), Some(&[1u8, 1, 1, 1][..]));
        assert!(queue.is_in_flight());
    }

    #[test]
    fn test_three_frames_coalesce_in_order() {
        let pool = BufferPool::new(64, 4);
        let mut queue = TransportQueue::new(64, true);
        assert!(queue.enqueue(frame(0, 8)).is_some());

        assert!(queue.enqueue(frame(1, 3)).is_none());
        assert!(queue.enqueue(frame(2, 4)).is_none());
        assert!(queue.enqueue(frame(3, 5)).is_none());

        let batch = queue.complete(&pool).unwrap();
        assert_eq!(&batch[..], &[1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 3]);
        assert!(queue.is_in_flight());

        assert!(queue.complete(&pool).is_none());
        assert!(!queue.is_in_flight());
        assert!(queue.is_idle());
    }

    #[test]
    fn test_batch_stops_at_budget() {
        let pool = BufferPool::new(16, 4);
        let mut queue = TransportQueue::new(10, true);
        queue.enqueue(frame(0, 1));
        queue.enqueue(frame(1, 6));
        queue.enqueue(frame(2, 6));

        assert_eq!(queue.complete(&pool).unwrap().len(), 6);
        assert_eq!(queue.queued(), 1);
        assert_eq!(&queue.complete(&pool).unwrap()[..], &[2; 6]);
    }

    #[test]
    fn test_frame_larger_than_budget_is_dropped() {
        let pool = BufferPool::new(16, 4);
        let mut queue = TransportQueue::new(10, true);
        queue.enqueue(frame(0, 1));
        queue.enqueue(frame(9, 11));
        queue.enqueue(frame(1, 2));

        assert_eq!(&queue.complete(&pool).unwrap()[..], &[1, 1]);
        assert_eq!(queue.dropped(), 1);
    }

    #[test]
    fn test_without_coalescing_frames_go_one_by_one() {
        let pool = BufferPool::new(16, 4);
        let mut queue = TransportQueue::new(64, false);
        queue.enqueue(frame(0, 1));
        queue.enqueue(frame(1, 1));
        queue.enqueue(frame(2, 1));

        assert_eq!(&queue.complete(&pool).unwrap()[..], &[1]);
        assert_eq!(&queue.complete(&pool).unwrap()[..], &[2]);
        assert!(queue.complete(&pool).is_none());
        assert!(queue.enqueue(frame(3, 1)).is_some());
    }
}
