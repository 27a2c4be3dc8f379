//! Record command: stream fixes from a source through the sync engine.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

use gpslog_core::{
    GeoJsonSink, LineSource, ListSink, LocationSource, NmeaSource, SimulatedSource, SyncEngine,
};
use gpslog_types::{Coordinate, Fix, LocationRecord, RecordId};

use crate::cli::{InputKind, RecordArgs};
use crate::config::Config;
use crate::util::open_store;

/// How long to wait for the view to catch up with the last acknowledged write.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Running totals for one recording session.
#[derive(Debug, Default)]
struct Tally {
    submitted: u64,
    acknowledged: u64,
    dropped: u64,
    rejected: u64,
    failed: u64,
    last_id: Option<RecordId>,
}

impl Tally {
    fn ack(&mut self, joined: Result<gpslog_store::Result<LocationRecord>, JoinError>) {
        match joined {
            Ok(Ok(record)) => {
                self.acknowledged += 1;
                self.last_id = record.id;
            }
            Ok(Err(e)) => {
                debug!("Write not acknowledged: {}", e);
                self.failed += 1;
            }
            Err(e) => {
                warn!("Acknowledgement task failed: {}", e);
                self.failed += 1;
            }
        }
    }
}

pub async fn cmd_record(args: RecordArgs, db_path: &Path, config: &Config, quiet: bool) -> Result<()> {
    let store = open_store(db_path)?;

    let mut engine_config = config.engine_config();
    if let Some(meters) = args.min_distance {
        engine_config = engine_config.min_distance_m(meters);
    }
    if args.no_purge {
        engine_config = engine_config.retention(None);
    }
    let engine = SyncEngine::new(store, engine_config).context("Invalid engine settings")?;

    if let Some(path) = args.geojson.clone().or_else(|| config.geojson_path.clone()) {
        info!("Writing map pins to {}", path.display());
        engine.attach_sink(Arc::new(GeoJsonSink::new(path))).await?;
    }
    if args.follow {
        engine.attach_sink(Arc::new(ListSink::new(io::stdout()))).await?;
    }

    let mut fixes = open_source(&args).await?;
    engine.start().await.context("Failed to start syncing")?;

    let tally = pump(&engine, &mut fixes).await;

    if let Some(last) = &tally.last_id {
        let mut view = engine.subscribe_snapshots();
        let settled = tokio::time::timeout(SETTLE_TIMEOUT, async {
            view.wait_for(|snapshot| snapshot.get(last).is_some())
                .await
                .map(|_| ())
        })
        .await;
        if !matches!(settled, Ok(Ok(()))) {
            debug!("View did not catch up before shutdown");
        }
    }

    engine.stop().await?;

    if !quiet {
        eprintln!(
            "Recorded {} of {} fixes ({} dropped, {} rejected, {} failed); {} locations stored",
            tally.acknowledged,
            tally.submitted + tally.dropped + tally.rejected,
            tally.dropped,
            tally.rejected,
            tally.failed,
            engine.snapshot().len()
        );
    }
    Ok(())
}

/// Feed every fix into the engine until the source ends or Ctrl-C.
async fn pump(engine: &SyncEngine, fixes: &mut BoxStream<'static, gpslog_core::Result<Fix>>) -> Tally {
    let mut tally = Tally::default();
    let mut acks = JoinSet::new();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted, finishing pending writes");
                break;
            }
            Some(joined) = acks.join_next() => tally.ack(joined),
            next = fixes.next() => match next {
                None => break,
                Some(Ok(fix)) => match engine.ingest(fix).await {
                    Ok(Some(submission)) => {
                        tally.submitted += 1;
                        acks.spawn(submission.acknowledged());
                    }
                    Ok(None) => tally.dropped += 1,
                    Err(e) => {
                        warn!("Rejected fix: {}", e);
                        tally.rejected += 1;
                    }
                },
                Some(Err(e)) => {
                    warn!("Skipping input: {}", e);
                    tally.rejected += 1;
                }
            },
        }
    }

    while let Some(joined) = acks.join_next().await {
        tally.ack(joined);
    }
    tally
}

async fn open_source(args: &RecordArgs) -> Result<BoxStream<'static, gpslog_core::Result<Fix>>> {
    let stream = match args.kind {
        InputKind::Lines => LineSource::new(open_input(&args.input).await?).into_stream(),
        InputKind::Nmea => NmeaSource::new(open_input(&args.input).await?).into_stream(),
        InputKind::Simulate => {
            let sim = &args.simulate;
            let (latitude, longitude) = sim.start;
            let start = Coordinate::new(latitude, longitude).context("Invalid --start")?;
            SimulatedSource::new(start)
                .count(sim.count)
                .step_m(sim.step)
                .interval(Duration::from_millis(sim.interval_ms))
                .seed(sim.seed)
                .into_stream()
        }
    };
    Ok(stream)
}

async fn open_input(path: &Path) -> Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    if path == Path::new("-") {
        return Ok(Box::new(BufReader::new(tokio::io::stdin())));
    }
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open input {}", path.display()))?;
    Ok(Box::new(BufReader::new(file)))
}
