use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bw_core::result::AnalysisResult;

use crate::error::BroadcastError;
use crate::registry::SubscriberRegistry;

/// Local observer called for each published result (console output, tests).
pub type ResultTap = Box<dyn FnMut(&AnalysisResult) + Send + 'static>;

/// Drains the analysis queue and fans each result out to the subscribers.
///
/// Owns the only slow path of the system: serialization and socket writes
/// happen here, never on the capture thread. The thread exits once every
/// sender of the queue has been dropped and the queue is empty.
pub struct Publisher {
    thread: Option<JoinHandle<u64>>,
}

impl Publisher {
    /// Spawn the publisher thread.
    ///
    /// # Errors
    /// Returns [`BroadcastError::Thread`] if the thread cannot be spawned.
    pub fn spawn(
        rx: flume::Receiver<AnalysisResult>,
        registry: Arc<SubscriberRegistry>,
        taps: Vec<ResultTap>,
    ) -> Result<Self, BroadcastError> {
        let thread = thread::Builder::new()
            .name("bw-publisher".to_string())
            .spawn(move || run(&rx, &registry, taps))
            .map_err(|e| BroadcastError::Thread(e.to_string()))?;
        Ok(Self {
            thread: Some(thread),
        })
    }

    /// Wait for the queue to drain. Returns how many results were published.
    ///
    /// Blocks until all senders are gone; drop them first.
    pub fn join(mut self) -> u64 {
        self.wait()
    }

    fn wait(&mut self) -> u64 {
        match self.thread.take().map(JoinHandle::join) {
            Some(Ok(count)) => count,
            Some(Err(_)) => {
                log::error!("Publisher thread panicked");
                0
            }
            None => 0,
        }
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.wait();
    }
}

fn run(
    rx: &flume::Receiver<AnalysisResult>,
    registry: &SubscriberRegistry,
    mut taps: Vec<ResultTap>,
) -> u64 {
    let mut published = 0u64;
    for result in rx.iter() {
        match encode(&result) {
            Ok(line) => {
                registry.broadcast(&line);
            }
            Err(e) => log::warn!("Sérialisation impossible : {e}"),
        }
        for tap in &mut taps {
            tap(&result);
        }
        published += 1;
    }
    log::debug!("Publisher terminé : {published} résultats");
    published
}

/// One result as a single-line JSON document.
///
/// # Errors
/// Returns [`BroadcastError::Serialize`] if serialization fails.
///
/// # Example
/// ```
/// use bw_broadcast::publisher::encode;
/// use bw_core::result::AnalysisResult;
/// let line = encode(&AnalysisResult::default()).unwrap();
/// assert!(line.contains("\"currentBPM\":0.0"));
/// assert!(!line.contains('\n'));
/// ```
pub fn encode(result: &AnalysisResult) -> Result<String, BroadcastError> {
    Ok(serde_json::to_string(result)?)
}
