//! The stress loop
//!
//! Every slot runs `open? -> bands.get(1) -> pixels.read` as a chain of
//! queued jobs. Reopening a dataset replaces the proxy in its slot, which
//! hands the old one to the tracker while other slots may still be reading
//! from it.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::Rng;
use warden_errors::{Error, Result};
use warden_events::EventReceiver;
use warden_jobs::{Controller, Job, JobHandle};
use warden_resources::{Proxy, ResourceRegistry};
use warden_types::{NativePtr, ResourceId};

use crate::logging::log_event_with_tracing;
use crate::native::{NativeBand, NativeDataset, RasterSpec};

/// Controller-side view of an open dataset
pub struct Dataset {
    native: Arc<NativeDataset>,
}

/// Controller-side view of a band; keeps its dataset reachable
pub struct Band {
    native: Arc<NativeBand>,
    dataset: Proxy<Dataset>,
}

#[derive(Debug, Clone)]
pub struct StressParams {
    pub datasets: usize,
    pub parallel: usize,
    pub keep: f64,
    pub ops: u64,
    pub raster: RasterSpec,
}

#[derive(Debug, Default, Clone)]
pub struct StressReport {
    pub opens: u64,
    pub ops: u64,
    pub verified: u64,
    pub gone: u64,
    pub failed: u64,
    pub progress_deliveries: u64,
    pub elapsed: Duration,
}

impl StressReport {
    #[must_use]
    pub fn ops_per_second(&self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let ops = self.ops as f64;
        ops / self.elapsed.as_secs_f64().max(f64::EPSILON)
    }

    fn record_failure(&mut self, stage: &str, err: &Error) {
        if err.is_resource_gone() {
            self.gone += 1;
        } else {
            self.failed += 1;
            tracing::error!(stage, error = %err, "operation failed");
        }
    }
}

enum Stage {
    Idle,
    Opening {
        slot: usize,
        handle: JobHandle<Proxy<Dataset>>,
    },
    Band(JobHandle<Proxy<Band>>),
    Reading(JobHandle<()>),
}

fn open_job(registry: &Arc<ResourceRegistry>, spec: RasterSpec) -> Job<Arc<NativeDataset>, Proxy<Dataset>> {
    let registry = Arc::clone(registry);
    Job::new(
        "open",
        move |_| NativeDataset::open(spec),
        move |native, _| {
            let ptr = NativePtr::of(&*native);
            let closing = Arc::clone(&native);
            registry.wrap(
                ptr,
                ResourceId::NONE,
                "dataset",
                || Dataset { native },
                Some(Box::new(move || closing.close())),
            )
        },
    )
}

fn band_job(dataset: &Proxy<Dataset>, index: usize) -> Job<Arc<NativeBand>, Proxy<Band>> {
    let native = Arc::clone(&dataset.native);
    let registry = Arc::clone(dataset.registry());
    Job::new(
        "bands.get",
        move |_| native.band(index),
        move |band, persisted| {
            let dataset = persisted
                .proxy::<Dataset>("dataset")
                .cloned()
                .ok_or_else(|| Error::internal("dataset proxy was not persisted"))?;
            let ptr = NativePtr::of(&*band);
            let parent = dataset.id();
            registry.wrap(
                ptr,
                parent,
                "band",
                || Band {
                    native: band,
                    dataset,
                },
                None,
            )
        },
    )
    .on_resource("dataset", dataset)
}

fn read_job(band: &Proxy<Band>, spec: RasterSpec, deliveries: &Rc<Cell<u64>>) -> Job<Vec<u8>, ()> {
    let native = Arc::clone(&band.native);
    let deliveries = Rc::clone(deliveries);
    Job::new(
        "pixels.read",
        move |progress| native.read(progress),
        move |data, _| verify(&data, spec),
    )
    .on_resource("band", band)
    .on_progress(move |_| deliveries.set(deliveries.get() + 1))
}

fn verify(data: &[u8], spec: RasterSpec) -> Result<()> {
    match data.get(spec.magic_offset) {
        Some(&value) if value == spec.magic_value => Ok(()),
        other => Err(Error::internal(format!(
            "pixel {} is {:?}, expected {}",
            spec.magic_offset, other, spec.magic_value
        ))),
    }
}

/// Run until `params.ops` operations have been started and all of them settled
pub fn run(
    controller: &Controller,
    params: &StressParams,
    rng: &mut StdRng,
    events: &mut EventReceiver,
) -> StressReport {
    let registry = Arc::clone(controller.registry());
    let deliveries = Rc::new(Cell::new(0));
    let mut datasets: Vec<Option<Proxy<Dataset>>> = (0..params.datasets).map(|_| None).collect();
    let mut slots: Vec<Stage> = (0..params.parallel).map(|_| Stage::Idle).collect();
    let mut report = StressReport::default();
    let started = Instant::now();

    loop {
        let mut busy = false;
        for stage in &mut slots {
            *stage = match std::mem::replace(stage, Stage::Idle) {
                Stage::Idle if report.ops < params.ops => {
                    report.ops += 1;
                    if report.ops % 1000 == 0 {
                        tracing::info!(ops = report.ops, opens = report.opens, "progress");
                    }
                    let slot = rng.random_range(0..params.datasets);
                    match &datasets[slot] {
                        Some(dataset) if rng.random::<f64>() <= params.keep => {
                            Stage::Band(controller.submit(band_job(dataset, 1)))
                        }
                        _ => {
                            report.opens += 1;
                            Stage::Opening {
                                slot,
                                handle: controller.submit(open_job(&registry, params.raster)),
                            }
                        }
                    }
                }
                Stage::Idle => Stage::Idle,
                Stage::Opening { slot, mut handle } => match handle.try_take() {
                    None => Stage::Opening { slot, handle },
                    Some(Ok(dataset)) => {
                        let band = controller.submit(band_job(&dataset, 1));
                        // The replaced proxy goes to the tracker
                        datasets[slot] = Some(dataset);
                        Stage::Band(band)
                    }
                    Some(Err(err)) => {
                        report.record_failure("open", &err);
                        Stage::Idle
                    }
                },
                Stage::Band(mut handle) => match handle.try_take() {
                    None => Stage::Band(handle),
                    Some(Ok(band)) => {
                        debug_assert!(band.dataset.is_alive());
                        Stage::Reading(controller.submit(read_job(&band, params.raster, &deliveries)))
                    }
                    Some(Err(err)) => {
                        report.record_failure("bands.get", &err);
                        Stage::Idle
                    }
                },
                Stage::Reading(mut handle) => match handle.try_take() {
                    None => Stage::Reading(handle),
                    Some(Ok(())) => {
                        report.verified += 1;
                        Stage::Idle
                    }
                    Some(Err(err)) => {
                        report.record_failure("pixels.read", &err);
                        Stage::Idle
                    }
                },
            };
            busy |= !matches!(stage, Stage::Idle);
        }

        if !busy && report.ops >= params.ops {
            break;
        }
        if controller.pump(Duration::from_millis(5)) {
            controller.run_pending();
        }
        forward_events(events);
    }

    report.elapsed = started.elapsed();
    drop(datasets);
    controller.drain();
    forward_events(events);

    report.progress_deliveries = deliveries.get();
    tracing::debug!(live = registry.len(), "stress loop finished");
    report
}

fn forward_events(events: &mut EventReceiver) {
    while let Ok(message) = events.try_recv() {
        log_event_with_tracing(&message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use warden_config::Config;
    use warden_jobs::Runtime;

    #[test]
    fn short_run_verifies_every_read() {
        let (tx, mut rx) = warden_events::channel();
        let mut config = Config::default();
        config.scheduler.worker_threads = 4;
        let runtime = Runtime::with_events(config, tx).unwrap();
        let controller = runtime.controller();
        let params = StressParams {
            datasets: 4,
            parallel: 8,
            keep: 0.5,
            ops: 200,
            raster: RasterSpec {
                width: 64,
                height: 64,
                bands: 1,
                magic_offset: 1000,
                magic_value: 75,
            },
        };

        let report = run(&controller, &params, &mut StdRng::seed_from_u64(7), &mut rx);
        assert_eq!(report.ops, 200);
        assert_eq!(report.failed, 0);
        assert_eq!(report.verified + report.gone, 200);
        assert!(report.opens >= 4);
        assert!(runtime.registry().is_empty());
    }

    #[test]
    fn verify_checks_magic() {
        let spec = RasterSpec {
            width: 4,
            height: 1,
            bands: 1,
            magic_offset: 2,
            magic_value: 9,
        };
        assert!(verify(&[0, 0, 9, 0], spec).is_ok());
        assert!(verify(&[0, 0, 8, 0], spec).is_err());
        assert!(verify(&[0], spec).is_err());
    }
}
