//! Wiring of the commands
//!
//! `serve` and `worker` own the broker: it is opened once in
//! [`Components::build`], which locks the queue directory, and closed by
//! [`Components::close`]. `submit` and `dead-letters` never open it and go
//! through the HTTP API of the process that does.

use std::sync::Arc;
use std::time::Duration;

use crowdcount::api::{self, AppState};
use crowdcount::client::ApiClient;
use crowdcount::config::Config;
use crowdcount::detector::{Detector, HttpDetector};
use crowdcount::fetch::{HttpConfig, HttpFetcher, ImageFetcher};
use crowdcount::observability::Metrics;
use crowdcount::queue::Broker;
use crowdcount::storage::{self, ResultStore};
use crowdcount::worker::{Pipeline, StageTimeouts, Worker};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{Instrument, error, info, info_span};

use crate::cli::{DeadLettersArgs, ServeArgs, SubmitArgs, WorkerArgs};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub struct Components {
    pub config: Config,
    pub broker: Arc<Broker>,
    pub fetcher: Arc<dyn ImageFetcher>,
    pub detector: Arc<dyn Detector>,
    pub store: Arc<dyn ResultStore>,
    pub metrics: Arc<Metrics>,
}

impl Components {
    pub fn build(config: Config) -> Result<Self, AnyError> {
        info!(
            path = %config.broker.path.display(),
            queue = %config.broker.queue_name,
            "Opening broker"
        );
        let broker = Broker::open(&config.broker.path, &config.broker.queue_name).map_err(|e| {
            error!(error = %e, "Broker unavailable, refusing to start");
            e
        })?;

        let fetcher = HttpFetcher::new(HttpConfig::from(&config.fetch))?;
        let detector = HttpDetector::new(&config.detector)?;
        let store = storage::from_config(&config.storage);

        Ok(Self {
            broker: Arc::new(broker),
            fetcher: Arc::new(fetcher),
            detector: Arc::new(detector),
            store,
            metrics: Arc::new(Metrics::new()),
            config,
        })
    }

    pub fn close(&self) {
        if let Err(e) = self.broker.close() {
            error!(error = %e, "Failed to close broker cleanly");
        }
    }

    fn pipeline(&self) -> Arc<Pipeline> {
        Arc::new(Pipeline::new(
            Arc::clone(&self.fetcher),
            Arc::clone(&self.detector),
            Arc::clone(&self.store),
            StageTimeouts::from_config(&self.config),
        ))
    }

    /// Start `consumers` competing workers that stop once `stop` flips to true
    fn spawn_workers(
        &self,
        prefetch: usize,
        consumers: usize,
        stop: &watch::Receiver<bool>,
    ) -> JoinSet<()> {
        let pipeline = self.pipeline();
        let mut workers = JoinSet::new();

        for id in 0..consumers {
            let worker = Worker::new(
                &self.broker,
                prefetch,
                Arc::clone(&pipeline),
                Arc::clone(&self.metrics),
                self.config.worker.dead_letter,
            );
            let mut stop = stop.clone();
            let shutdown = async move {
                let _ = stop.wait_for(|stopped| *stopped).await;
            };
            workers.spawn(worker.run(shutdown).instrument(info_span!("consumer", id)));
        }

        workers
    }
}

async fn join_workers(mut workers: JoinSet<()>) {
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Worker task panicked");
        }
    }
}

fn check_worker_args(prefetch: usize, consumers: usize) -> Result<(), AnyError> {
    if prefetch == 0 {
        return Err("--prefetch must be at least 1".into());
    }
    if consumers == 0 {
        return Err("--consumers must be at least 1".into());
    }
    Ok(())
}

pub async fn serve(components: &Components, args: ServeArgs) -> Result<(), AnyError> {
    let address = args.address.unwrap_or(components.config.server.bind_addr);
    let prefetch = components.config.broker.prefetch;
    let consumers = args.consumers.unwrap_or(components.config.worker.consumers);
    check_worker_args(prefetch, consumers)?;

    let state = AppState::new(
        components.config.clone(),
        Arc::clone(&components.broker),
        Arc::clone(&components.fetcher),
        Arc::clone(&components.detector),
        Arc::clone(&components.store),
        Arc::clone(&components.metrics),
    );

    let (stop_tx, stop_rx) = watch::channel(false);

    let workers = args.with_worker.then(|| {
        info!(prefetch, consumers, "Starting embedded worker");
        components.spawn_workers(prefetch, consumers, &stop_rx)
    });

    let served = api::run(address, state, async move {
        api::shutdown_signal().await;
        let _ = stop_tx.send(true);
    })
    .await;

    if let Some(workers) = workers {
        join_workers(workers).await;
    }

    served
}

pub async fn worker(components: &Components, args: WorkerArgs) -> Result<(), AnyError> {
    let prefetch = args.prefetch.unwrap_or(components.config.broker.prefetch);
    let consumers = args.consumers.unwrap_or(components.config.worker.consumers);
    check_worker_args(prefetch, consumers)?;

    info!(
        queue = %components.broker.queue_name(),
        prefetch,
        consumers,
        dead_letter = components.config.worker.dead_letter,
        "Starting worker"
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    let workers = components.spawn_workers(prefetch, consumers, &stop_rx);

    api::shutdown_signal().await;
    let _ = stop_tx.send(true);
    join_workers(workers).await;

    Ok(())
}

fn api_client(config: &Config, server: Option<&str>, timeout: Duration) -> Result<ApiClient, AnyError> {
    let base = server.map_or_else(|| config.server.local_url(), str::to_string);
    info!(server = %base, "Using crowdcount server");
    Ok(ApiClient::new(&base, timeout)?)
}

pub async fn submit(config: &Config, args: SubmitArgs) -> Result<(), AnyError> {
    // The server probes every URL before it answers
    let per_url =
        Duration::from_millis(config.fetch.connect_timeout_ms + config.fetch.request_timeout_ms);
    let urls = u32::try_from(args.urls.len()).unwrap_or(u32::MAX);
    let timeout = per_url.saturating_mul(urls) + Duration::from_secs(30);

    let client = api_client(config, args.server.as_deref(), timeout)?;
    let report = client.submit(&args.urls).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub async fn dead_letters(config: &Config, args: DeadLettersArgs) -> Result<(), AnyError> {
    let client = api_client(config, args.server.as_deref(), Duration::from_secs(30))?;
    let records = client.dead_letters(args.limit).await?;

    let records = records.as_array().map(Vec::as_slice).unwrap_or_default();
    for record in records {
        println!("{}", serde_json::to_string(record)?);
    }
    info!(count = records.len(), "Listed dead letters");

    Ok(())
}
