//! Ring-bus dispatcher
//!
//! Owns the consumer half of the ring. Bytes are accumulated until a
//! complete frame is present, then decoded and fanned out: trades to the
//! trade queue, book updates to both book queues. The ring itself never
//! tears a frame (the producer only publishes whole frames), but the
//! dispatcher still defends against corruption: an impossible header makes
//! it scan forward to the next plausible type tag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};
use types::depth::BookUpdate;
use types::trade::TradeRecord;

use crate::codec::{self, FramePayload, TYPE_ORDERBOOK, TYPE_TRADE};
use crate::metrics::PipelineMetrics;
use crate::queue::BoundedQueue;
use crate::ring::RingConsumer;

/// Bytes pulled off the ring per poll.
const READ_CHUNK: usize = 8192;

/// Idle sleep between polls when the ring is empty.
const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Decodes frames off the ring and feeds the consumer queues.
pub struct Dispatcher {
    consumer: RingConsumer,
    trade_q: Arc<BoundedQueue<TradeRecord>>,
    book_q_liquidity: Arc<BoundedQueue<BookUpdate>>,
    book_q_iceberg: Arc<BoundedQueue<BookUpdate>>,
    metrics: Arc<PipelineMetrics>,
    stop: Arc<AtomicBool>,
    acc: Vec<u8>,
}

impl Dispatcher {
    pub fn new(
        consumer: RingConsumer,
        trade_q: Arc<BoundedQueue<TradeRecord>>,
        book_q_liquidity: Arc<BoundedQueue<BookUpdate>>,
        book_q_iceberg: Arc<BoundedQueue<BookUpdate>>,
        metrics: Arc<PipelineMetrics>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            consumer,
            trade_q,
            book_q_liquidity,
            book_q_iceberg,
            metrics,
            stop,
            acc: Vec::with_capacity(READ_CHUNK * 2),
        }
    }

    /// Pull whatever the ring holds and dispatch every complete frame.
    /// Returns the number of frames dispatched.
    pub fn process_available(&mut self) -> usize {
        let mut scratch = [0u8; READ_CHUNK];
        loop {
            let n = self.consumer.read(&mut scratch);
            if n == 0 {
                break;
            }
            self.acc.extend_from_slice(&scratch[..n]);
        }

        let mut dispatched = 0;
        loop {
            match codec::try_decode_frame(&self.acc) {
                Ok(Some((payload, consumed))) => {
                    self.acc.drain(..consumed);
                    self.dispatch(payload);
                    dispatched += 1;
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "Corrupt frame; scanning for next tag");
                    PipelineMetrics::incr(&self.metrics.frame_resyncs);
                    self.resync();
                }
            }
        }
        dispatched
    }

    /// Consumer loop: poll, dispatch, sleep when idle. On shutdown the ring
    /// is drained before the queues are closed so nothing in flight is lost.
    pub fn run(mut self) {
        loop {
            let dispatched = self.process_available();

            if self.stop.load(Ordering::Acquire) && self.consumer.is_empty() {
                break;
            }
            if dispatched == 0 {
                thread::sleep(IDLE_SLEEP);
            }
        }

        self.trade_q.close();
        self.book_q_liquidity.close();
        self.book_q_iceberg.close();
        info!("Dispatcher stopped");
    }

    fn dispatch(&self, payload: FramePayload) {
        match payload {
            FramePayload::Trade(trade) => {
                let _ = self.trade_q.push(trade);
            }
            FramePayload::Book(update) => {
                let _ = self.book_q_liquidity.push(update.clone());
                let _ = self.book_q_iceberg.push(update);
            }
        }
    }

    /// Drop bytes until the accumulator starts with a plausible type tag.
    fn resync(&mut self) {
        let next_tag = self.acc[1..]
            .iter()
            .position(|&b| b == TYPE_TRADE || b == TYPE_ORDERBOOK);
        match next_tag {
            Some(offset) => {
                self.acc.drain(..offset + 1);
            }
            None => self.acc.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{frame_book, frame_trade};
    use crate::ring;
    use types::level::PriceLevel;

    struct Harness {
        producer: crate::ring::RingProducer,
        dispatcher: Dispatcher,
        trade_q: Arc<BoundedQueue<TradeRecord>>,
        book_q_liquidity: Arc<BoundedQueue<BookUpdate>>,
        book_q_iceberg: Arc<BoundedQueue<BookUpdate>>,
        metrics: Arc<PipelineMetrics>,
    }

    fn make_harness() -> Harness {
        let (producer, consumer) = ring::split(1 << 16);
        let trade_q = Arc::new(BoundedQueue::new(1024));
        let book_q_liquidity = Arc::new(BoundedQueue::new(1024));
        let book_q_iceberg = Arc::new(BoundedQueue::new(1024));
        let metrics = Arc::new(PipelineMetrics::new());
        let dispatcher = Dispatcher::new(
            consumer,
            Arc::clone(&trade_q),
            Arc::clone(&book_q_liquidity),
            Arc::clone(&book_q_iceberg),
            Arc::clone(&metrics),
            Arc::new(AtomicBool::new(false)),
        );
        Harness {
            producer,
            dispatcher,
            trade_q,
            book_q_liquidity,
            book_q_iceberg,
            metrics,
        }
    }

    fn make_trade(id: u64) -> TradeRecord {
        let mut trade = TradeRecord {
            trade_id: id,
            price: 30000.0,
            quantity: 0.1,
            timestamp_ns: 1_700_000_000_000_000_000,
            ..TradeRecord::default()
        };
        trade.set_buyer_maker(false);
        trade
    }

    fn make_update(id: u64) -> BookUpdate {
        BookUpdate {
            timestamp_ns: 1_700_000_000_000_000_000,
            last_update_id: id,
            bids: vec![PriceLevel::new(29999.0, 1.0)],
            asks: vec![PriceLevel::new(30001.0, 2.0)],
        }
    }

    #[test]
    fn test_trade_frames_reach_trade_queue() {
        let mut h = make_harness();

        assert!(h.producer.write_frame(&frame_trade(&make_trade(1))));
        assert!(h.producer.write_frame(&frame_trade(&make_trade(2))));

        assert_eq!(h.dispatcher.process_available(), 2);
        assert_eq!(h.trade_q.try_pop().unwrap().trade_id, 1);
        assert_eq!(h.trade_q.try_pop().unwrap().trade_id, 2);
        assert!(h.book_q_liquidity.is_empty());
    }

    #[test]
    fn test_book_frames_fan_out_to_both_queues() {
        let mut h = make_harness();

        assert!(h.producer.write_frame(&frame_book(&make_update(7))));
        assert_eq!(h.dispatcher.process_available(), 1);

        assert_eq!(h.book_q_liquidity.try_pop().unwrap().last_update_id, 7);
        assert_eq!(h.book_q_iceberg.try_pop().unwrap().last_update_id, 7);
        assert!(h.trade_q.is_empty());
    }

    #[test]
    fn test_partial_frame_waits_for_rest() {
        let mut h = make_harness();
        let framed = frame_trade(&make_trade(9));

        let split_at = framed.len() - 4;
        assert_eq!(h.producer.write(&framed[..split_at]), split_at);
        assert_eq!(h.dispatcher.process_available(), 0);

        assert_eq!(h.producer.write(&framed[split_at..]), 4);
        assert_eq!(h.dispatcher.process_available(), 1);
        assert_eq!(h.trade_q.try_pop().unwrap().trade_id, 9);
    }

    #[test]
    fn test_corrupt_bytes_resync_to_next_frame() {
        let mut h = make_harness();

        // Garbage, then a valid trade frame.
        let garbage = [0xff, 0xee, 0xdd];
        assert_eq!(h.producer.write(&garbage), garbage.len());
        assert!(h.producer.write_frame(&frame_trade(&make_trade(3))));

        assert_eq!(h.dispatcher.process_available(), 1);
        assert_eq!(h.trade_q.try_pop().unwrap().trade_id, 3);
        assert!(h.metrics.export()["frame_resyncs"] >= 1);
    }

    #[test]
    fn test_interleaved_frames_keep_order() {
        let mut h = make_harness();

        assert!(h.producer.write_frame(&frame_trade(&make_trade(1))));
        assert!(h.producer.write_frame(&frame_book(&make_update(2))));
        assert!(h.producer.write_frame(&frame_trade(&make_trade(3))));

        assert_eq!(h.dispatcher.process_available(), 3);
        assert_eq!(h.trade_q.try_pop().unwrap().trade_id, 1);
        assert_eq!(h.trade_q.try_pop().unwrap().trade_id, 3);
        assert_eq!(h.book_q_liquidity.try_pop().unwrap().last_update_id, 2);
    }
}
