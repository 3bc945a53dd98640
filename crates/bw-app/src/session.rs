use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use bw_audio::accumulator::StreamFormat;
use bw_audio::capture::{CaptureSource, CaptureStatus};
use bw_audio::pipeline::{AnalysisPipeline, ChannelSink, PipelineStats};
use bw_broadcast::{BroadcastServer, Publisher, ResultTap, SubscriberRegistry};
use bw_core::config::BeatwireConfig;
use parking_lot::Mutex;

/// Shared between the session and the capture callback. `None` once stopped.
type SharedPipeline = Arc<Mutex<Option<AnalysisPipeline>>>;

/// What `wait_status` observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Capture still delivering.
    Running,
    /// The source reached its end (file replay).
    Finished,
}

/// End-of-session counters.
#[derive(Clone, Copy, Debug, Default)]
pub struct SessionReport {
    /// Results handed to subscribers by the publisher.
    pub published: u64,
    /// Results lost to a full queue.
    pub dropped: u64,
    pub pipeline: PipelineStats,
}

/// Everything that only exists between `start` and `stop`.
struct Active {
    format: StreamFormat,
    server: BroadcastServer,
    publisher: Publisher,
    pipeline: SharedPipeline,
    status_rx: flume::Receiver<CaptureStatus>,
    dropped: Arc<AtomicU64>,
}

/// One capture-to-subscribers run.
///
/// Lifecycle: `new` → `start` → `stop` (also on drop). The capture callback
/// analyses chunks in place and hands results to the publisher through a
/// bounded queue; stopping drains that queue before the server goes down.
pub struct Session {
    config: BeatwireConfig,
    source: Box<dyn CaptureSource>,
    taps: Vec<ResultTap>,
    active: Option<Active>,
}

impl Session {
    #[must_use]
    pub fn new(config: BeatwireConfig, source: Box<dyn CaptureSource>) -> Self {
        Self {
            config,
            source,
            taps: Vec::new(),
            active: None,
        }
    }

    /// Register a local observer of published results. Effective at the next `start`.
    pub fn add_tap(&mut self, tap: ResultTap) {
        self.taps.push(tap);
    }

    /// Bind the server, spawn the publisher and start the capture source.
    ///
    /// # Errors
    /// Fails if the session is already running, the bind address is taken,
    /// or the source cannot be opened. Nothing is left running on error.
    pub fn start(&mut self) -> Result<StreamFormat> {
        if self.active.is_some() {
            anyhow::bail!("Session déjà démarrée");
        }

        let registry = Arc::new(SubscriberRegistry::new());
        let server = BroadcastServer::bind(
            &self.config.broadcast.bind,
            Arc::clone(&registry),
            self.config.broadcast.write_timeout(),
        )
        .context("Impossible de démarrer le serveur de diffusion")?;

        let (tx, rx) = flume::bounded(self.config.broadcast.queue_capacity.max(1));
        let publisher = Publisher::spawn(rx, registry, std::mem::take(&mut self.taps))
            .context("Impossible de démarrer le publisher")?;

        let sink = ChannelSink::new(tx);
        let dropped = sink.dropped_counter();
        let pipeline: SharedPipeline =
            Arc::new(Mutex::new(Some(AnalysisPipeline::new(&self.config, sink))));

        let (status_tx, status_rx) = flume::unbounded();
        let on_chunk = {
            let pipeline = Arc::clone(&pipeline);
            Box::new(move |bytes: &[u8], format: StreamFormat| {
                if let Some(p) = pipeline.lock().as_mut() {
                    p.push_chunk(bytes, format);
                }
            })
        };
        let on_status = Box::new(move |status: CaptureStatus| {
            let _ = status_tx.send(status);
        });

        let format = match self.source.start(on_chunk, on_status) {
            Ok(format) => format,
            Err(e) => {
                // Drop the sink so the publisher can exit before it is joined.
                pipeline.lock().take();
                publisher.join();
                return Err(anyhow::Error::new(e)
                    .context(format!("Capture impossible : {}", self.source.describe())));
            }
        };

        log::info!(
            "Session démarrée : {} ({} Hz, {} ch, {} bits) → ws://{}/",
            self.source.describe(),
            format.sample_rate,
            format.channels,
            format.bits_per_sample,
            server.local_addr()
        );
        if !format.is_supported() {
            log::warn!(
                "Profondeur {} bits non supportée : les échantillons seront ignorés",
                format.bits_per_sample
            );
        }

        self.active = Some(Active {
            format,
            server,
            publisher,
            pipeline,
            status_rx,
            dropped,
        });
        Ok(format)
    }

    /// Wait up to `timeout` for a capture event.
    ///
    /// # Errors
    /// A capture failure is terminal and returned as an error, as is waiting
    /// on a session that is not running.
    pub fn wait_status(&self, timeout: Duration) -> Result<SessionState> {
        let Some(active) = self.active.as_ref() else {
            anyhow::bail!("Session non démarrée");
        };
        match active.status_rx.recv_timeout(timeout) {
            Ok(CaptureStatus::Finished) => Ok(SessionState::Finished),
            Ok(CaptureStatus::Failed(e)) => Err(anyhow::Error::new(e)
                .context(format!("Capture interrompue : {}", self.source.describe()))),
            Err(flume::RecvTimeoutError::Timeout) => Ok(SessionState::Running),
            Err(flume::RecvTimeoutError::Disconnected) => Ok(SessionState::Finished),
        }
    }

    /// Stop capture, flush the queue to subscribers and close everything.
    ///
    /// Returns `None` if the session was not running. Idempotent.
    pub fn stop(&mut self) -> Option<SessionReport> {
        let mut active = self.active.take()?;

        self.source.stop();

        let mut stats = PipelineStats::default();
        let pipeline = active.pipeline.lock().take();
        if let Some(mut p) = pipeline {
            p.finish(self.config.capture.flush_partial);
            stats = p.stats();
        }

        let published = active.publisher.join();
        active.server.shutdown();

        let report = SessionReport {
            published,
            dropped: active.dropped.load(Ordering::Relaxed),
            pipeline: stats,
        };
        log::info!(
            "Session arrêtée : {} frames analysées, {} publiées, {} perdues",
            report.pipeline.frames_analyzed,
            report.published,
            report.dropped
        );
        Some(report)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// Address subscribers connect to, while running.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.active.as_ref().map(|a| a.server.local_addr())
    }

    /// Format reported by the capture source, while running.
    #[must_use]
    pub fn format(&self) -> Option<StreamFormat> {
        self.active.as_ref().map(|a| a.format)
    }

    /// Connected subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.active.as_ref().map_or(0, |a| a.server.registry().len())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::time::Instant;

    use bw_audio::AudioError;
    use bw_audio::capture::{ChunkHandler, StatusHandler};
    use bw_core::result::AnalysisResult;

    use super::*;

    type Handlers = Arc<Mutex<Option<(ChunkHandler, StatusHandler)>>>;

    /// Source driven by the test: it keeps the handlers so chunks and
    /// statuses can be pushed after `start`.
    struct ScriptedSource {
        handlers: Handlers,
        stopped: Arc<AtomicBool>,
        fail_start: bool,
    }

    impl CaptureSource for ScriptedSource {
        fn describe(&self) -> String {
            "scripted".to_string()
        }

        fn start(
            &mut self,
            on_chunk: ChunkHandler,
            on_status: StatusHandler,
        ) -> Result<StreamFormat, AudioError> {
            if self.fail_start {
                return Err(AudioError::NoInputDevice);
            }
            *self.handlers.lock() = Some((on_chunk, on_status));
            Ok(mono16())
        }

        fn stop(&mut self) {
            self.stopped.store(true, Ordering::Relaxed);
            self.handlers.lock().take();
        }
    }

    fn mono16() -> StreamFormat {
        StreamFormat::new(48000, 1, 16)
    }

    fn local_config(flush_partial: bool) -> BeatwireConfig {
        let mut config = BeatwireConfig::default();
        config.broadcast.bind = "127.0.0.1:0".to_string();
        config.capture.flush_partial = flush_partial;
        config
    }

    fn scripted(config: BeatwireConfig) -> (Session, Handlers, Arc<AtomicBool>) {
        let handlers: Handlers = Arc::new(Mutex::new(None));
        let stopped = Arc::new(AtomicBool::new(false));
        let source = ScriptedSource {
            handlers: Arc::clone(&handlers),
            stopped: Arc::clone(&stopped),
            fail_start: false,
        };
        (Session::new(config, Box::new(source)), handlers, stopped)
    }

    fn push(handlers: &Handlers, samples: usize) {
        if let Some((on_chunk, _)) = handlers.lock().as_mut() {
            on_chunk(&vec![0u8; samples * 2], mono16());
        }
    }

    #[test]
    fn frames_reach_websocket_subscribers() {
        let (mut session, handlers, stopped) = scripted(local_config(false));
        session.start().unwrap();
        let addr = session.local_addr().unwrap();

        let (mut client, response) = tungstenite::connect(format!("ws://{addr}/")).unwrap();
        assert_eq!(response.status().as_u16(), 101);
        let deadline = Instant::now() + Duration::from_secs(5);
        while session.subscriber_count() == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(session.subscriber_count(), 1);

        push(&handlers, 2048);
        let message = client.read().unwrap();
        assert!(message.is_text());
        let result: AnalysisResult =
            serde_json::from_str(message.into_text().unwrap().as_str()).unwrap();
        assert_eq!(result, AnalysisResult::default());

        let report = session.stop().unwrap();
        assert!(stopped.load(Ordering::Relaxed));
        assert_eq!(report.published, 1);
        assert_eq!(report.pipeline.frames_analyzed, 1);
        assert_eq!(session.subscriber_count(), 0);
    }

    #[test]
    fn partial_frame_discarded_by_default() {
        let (mut session, handlers, _) = scripted(local_config(false));
        session.start().unwrap();
        push(&handlers, 1000);
        assert_eq!(session.stop().unwrap().published, 0);
    }

    #[test]
    fn partial_frame_flushed_when_configured() {
        let (mut session, handlers, _) = scripted(local_config(true));
        session.start().unwrap();
        push(&handlers, 1000);
        let report = session.stop().unwrap();
        assert_eq!(report.published, 1);
        assert_eq!(report.pipeline.frames_analyzed, 1);
    }

    #[test]
    fn taps_see_every_result() {
        let (mut session, handlers, _) = scripted(local_config(false));
        let seen = Arc::new(Mutex::new(0usize));
        {
            let seen = Arc::clone(&seen);
            session.add_tap(Box::new(move |_| *seen.lock() += 1));
        }
        session.start().unwrap();
        push(&handlers, 2048 * 3);
        session.stop();
        assert_eq!(*seen.lock(), 3);
    }

    #[test]
    fn capture_failure_is_terminal() {
        let (mut session, handlers, _) = scripted(local_config(false));
        session.start().unwrap();
        assert_eq!(
            session.wait_status(Duration::from_millis(10)).unwrap(),
            SessionState::Running
        );

        if let Some((_, on_status)) = handlers.lock().as_mut() {
            on_status(CaptureStatus::Failed(AudioError::StreamError("device unplugged".into())));
        }
        let err = session.wait_status(Duration::from_secs(1)).unwrap_err();
        assert!(format!("{err:#}").contains("device unplugged"));
    }

    #[test]
    fn finished_source_is_reported() {
        let (mut session, handlers, _) = scripted(local_config(false));
        session.start().unwrap();
        if let Some((_, on_status)) = handlers.lock().as_mut() {
            on_status(CaptureStatus::Finished);
        }
        assert_eq!(
            session.wait_status(Duration::from_secs(1)).unwrap(),
            SessionState::Finished
        );
    }

    #[test]
    fn stop_is_idempotent_and_start_twice_fails() {
        let (mut session, _, _) = scripted(local_config(false));
        assert!(session.stop().is_none());
        session.start().unwrap();
        assert!(session.start().is_err());
        assert!(session.stop().is_some());
        assert!(session.stop().is_none());
        assert!(session.wait_status(Duration::from_millis(1)).is_err());
    }

    #[test]
    fn failed_start_leaves_nothing_running() {
        let source = ScriptedSource {
            handlers: Arc::new(Mutex::new(None)),
            stopped: Arc::new(AtomicBool::new(false)),
            fail_start: true,
        };
        let mut session = Session::new(local_config(false), Box::new(source));
        let err = session.start().unwrap_err();
        assert!(format!("{err:#}").contains("scripted"));
        assert!(!session.is_running());
    }
}
