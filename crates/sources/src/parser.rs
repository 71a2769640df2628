//! Parser worker pool
//!
//! One worker thread per CPU drains the raw ring, decodes each frame with
//! its configured decoder, labels the results with the connection
//! properties, and stashes the full messages. Parse failures are counted
//! and dropped; a fatal stash stops the pool and raises the service's
//! fatal signal.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use skewer_model::{decoders, FullMessage, Generator, RawMessage};
use skewer_queue::Ring;

use crate::{RawMessagePool, SourceMetrics, StashOutcome, Stasher};

pub struct ParserPool {
    handles: Vec<std::thread::JoinHandle<()>>,
}

impl ParserPool {
    /// Spawn `workers` parser threads (defaults to the CPU count when 0).
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        proto: &'static str,
        workers: usize,
        raw_ring: Arc<Ring<RawMessage>>,
        pool: Arc<RawMessagePool>,
        stasher: Arc<dyn Stasher>,
        metrics: Arc<SourceMetrics>,
        fatal: CancellationToken,
    ) -> ParserPool {
        let workers = if workers == 0 {
            num_cpus::get()
        } else {
            workers
        };
        let handles = (0..workers)
            .map(|i| {
                let raw_ring = Arc::clone(&raw_ring);
                let pool = Arc::clone(&pool);
                let stasher = Arc::clone(&stasher);
                let metrics = Arc::clone(&metrics);
                let fatal = fatal.clone();
                std::thread::Builder::new()
                    .name(format!("{proto}-parser-{i}"))
                    .spawn(move || {
                        parse_loop(proto, &raw_ring, &pool, &*stasher, &metrics, &fatal)
                    })
                    .expect("spawning a parser thread")
            })
            .collect();
        ParserPool { handles }
    }

    /// Wait for every worker to drain and exit (dispose the raw ring
    /// first).
    pub fn join(self) {
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn parse_loop(
    proto: &'static str,
    raw_ring: &Ring<RawMessage>,
    pool: &RawMessagePool,
    stasher: &dyn Stasher,
    metrics: &SourceMetrics,
    fatal: &CancellationToken,
) {
    let mut generator = Generator::new();
    // workers drain what is left after dispose, then exit
    while let Ok(raw) = raw_ring.get() {
        let outcome = parse_one(proto, &raw, &mut generator, stasher, metrics);
        pool.put(raw);
        if outcome == StashOutcome::Fatal {
            tracing::error!(proto, "fatal error stashing a message");
            fatal.cancel();
            return;
        }
        if fatal.is_cancelled() {
            return;
        }
    }
}

fn parse_one(
    proto: &'static str,
    raw: &RawMessage,
    generator: &mut Generator,
    stasher: &dyn Stasher,
    metrics: &SourceMetrics,
) -> StashOutcome {
    let parsed = match decoders::decode(&raw.decoder, &raw.data) {
        Ok(parsed) => parsed,
        Err(e) => {
            metrics
                .parsing_errors_total
                .with_label_values(&[proto, &raw.client, raw.decoder.format.as_str()])
                .inc();
            tracing::info!(
                proto,
                client = %raw.client,
                format = raw.decoder.format.as_str(),
                error = %e,
                "parsing error, message dropped"
            );
            return StashOutcome::Refused;
        }
    };

    let mut worst = StashOutcome::Ok;
    for fields in parsed {
        let full = FullMessage::from_parsed(generator.uid(), raw, fields);
        match stasher.stash(full) {
            StashOutcome::Ok => {}
            StashOutcome::Refused => {
                if worst == StashOutcome::Ok {
                    worst = StashOutcome::Refused;
                }
            }
            StashOutcome::Fatal => return StashOutcome::Fatal,
        }
    }
    worst
}

#[cfg(test)]
#[path = "parser_test.rs"]
mod parser_test;
