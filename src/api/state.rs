use std::sync::Arc;

use crate::config::Config;
use crate::detector::Detector;
use crate::fetch::ImageFetcher;
use crate::observability::Metrics;
use crate::producer::Producer;
use crate::queue::Broker;
use crate::storage::ResultStore;
use crate::worker::{Pipeline, StageTimeouts};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub broker: Arc<Broker>,
    pub producer: Arc<Producer>,
    pub pipeline: Arc<Pipeline>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        config: Config,
        broker: Arc<Broker>,
        fetcher: Arc<dyn ImageFetcher>,
        detector: Arc<dyn Detector>,
        store: Arc<dyn ResultStore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let producer = Producer::new(Arc::clone(&broker), Arc::clone(&fetcher), Arc::clone(&metrics));
        let pipeline = Pipeline::new(fetcher, detector, store, StageTimeouts::from_config(&config));

        Self {
            config: Arc::new(config),
            broker,
            producer: Arc::new(producer),
            pipeline: Arc::new(pipeline),
            metrics,
        }
    }
}
