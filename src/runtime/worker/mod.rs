pub mod drug;

use async_trait::async_trait;
use std::collections::HashMap;

use super::RuntimeError;

#[async_trait]
pub trait Worker: Send + Sync + 'static {
    fn name(&self) -> &str;
    async fn start(&self) -> Result<(), RuntimeError>;
    async fn stop(&self) -> Result<(), RuntimeError>;
    fn is_running(&self) -> bool;
}

pub struct WorkerPool {
    workers: HashMap<String, Box<dyn Worker>>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self {
            workers: HashMap::new(),
        }
    }

    pub fn add_worker<W: Worker + 'static>(&mut self, worker: W) {
        self.workers.insert(worker.name().to_string(), Box::new(worker));
    }

    pub async fn start_all(&self) -> Result<(), RuntimeError> {
        for worker in self.workers.values() {
            worker.start().await?;
        }
        Ok(())
    }

    pub async fn stop_all(&self) -> Result<(), RuntimeError> {
        for worker in self.workers.values() {
            worker.stop().await?;
        }
        Ok(())
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}
