use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use tokio::{task::JoinHandle, time::interval};

pub static METER: Meter = Meter::new();

/// Process-wide frame counters, reset on every read.
#[derive(Default)]
pub struct Meter {
    decoded_frames: AtomicU64,
    classified_frames: AtomicU64,
    decisions: AtomicU64,
}

impl Meter {
    pub const fn new() -> Meter {
        Meter {
            decoded_frames: AtomicU64::new(0),
            classified_frames: AtomicU64::new(0),
            decisions: AtomicU64::new(0),
        }
    }

    pub fn tick_decoded(&self) {
        self.decoded_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_classified(&self) {
        self.classified_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_decision(&self) {
        self.decisions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_reset_decoded(&self) -> u64 {
        self.decoded_frames.swap(0, Ordering::Relaxed)
    }

    pub fn get_reset_classified(&self) -> u64 {
        self.classified_frames.swap(0, Ordering::Relaxed)
    }

    pub fn get_reset_decisions(&self) -> u64 {
        self.decisions.swap(0, Ordering::Relaxed)
    }
}

pub fn spawn_meter_logger() -> JoinHandle<()> {
    tokio::spawn(async {
        let mut log_interval = interval(Duration::from_secs(2));
        log_interval.tick().await;

        loop {
            let start = Instant::now();
            log_interval.tick().await;

            let decoded = METER.get_reset_decoded();
            let classified = METER.get_reset_classified();
            let decisions = METER.get_reset_decisions();
            let elapsed = start.elapsed().as_secs_f32();

            if decoded > 0 {
                log::info!("Decoded frames per second: {:.2}", decoded as f32 / elapsed)
            }
            if classified > 0 {
                log::info!("Classified frames per second: {:.2}", classified as f32 / elapsed)
            }
            if decisions > 0 {
                log::info!("Decisions in the last {elapsed:.1}s: {decisions}")
            }
        }
    })
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn test_get_resets() {
        let meter = Meter::new();
        meter.tick_decoded();
        meter.tick_decoded();
        meter.tick_classified();

        assert_eq!(meter.get_reset_decoded(), 2);
        assert_eq!(meter.get_reset_decoded(), 0);
        assert_eq!(meter.get_reset_classified(), 1);
        assert_eq!(meter.get_reset_decisions(), 0);
    }
}
