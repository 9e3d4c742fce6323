use std::io::Error as IoError;

use thiserror::Error;

use crate::config::ConfigError;
use crate::controller::ControllerError;
use crate::monitoring::SchedulerError;
use crate::publisher::PublishError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0:#}")]
    Io(#[from] IoError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Metrics registry error: {0}")]
    Metrics(#[from] prometheus::Error),
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
    #[error("Controller error: {0}")]
    Controller(#[from] ControllerError),
    #[error("Publisher error: {0}")]
    Publisher(#[from] PublishError),
}
