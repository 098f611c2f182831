//! Background service lifecycle management.
//!
//! `BackgroundServices` owns the threads spawned at startup and stops them
//! cleanly on shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::core::ProfileCache;

/// How often a sleeping service checks for shutdown.
const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

/// Manages the background threads spawned during server setup.
///
/// Currently one service: the profile flusher, which periodically writes
/// dirty transport state (masks, connect times, ping counters) back to the
/// directory.
pub struct BackgroundServices {
    shutdown: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundServices {
    /// Start all background services.
    pub fn start(cache: &Arc<ProfileCache>, flush_interval: Duration) -> std::io::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flusher = Self::start_profile_flusher(Arc::clone(cache), flush_interval, Arc::clone(&shutdown))?;
        Ok(Self {
            shutdown,
            handles: vec![flusher],
        })
    }

    fn start_profile_flusher(
        cache: Arc<ProfileCache>,
        interval: Duration,
        shutdown: Arc<AtomicBool>,
    ) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("profile-flusher".into())
            .spawn(move || {
                let mut last_flush = Instant::now();
                while !shutdown.load(Ordering::Relaxed) {
                    std::thread::sleep(SHUTDOWN_POLL.min(interval));
                    if last_flush.elapsed() < interval {
                        continue;
                    }
                    last_flush = Instant::now();

                    let saved = cache.flush_dirty();
                    if saved > 0 {
                        tracing::debug!("Profile flusher saved {saved} transports");
                    }
                }
            })
    }

    /// Signal every service to stop and wait for it to exit.
    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        for handle in self.handles {
            if handle.join().is_err() {
                tracing::error!("Background service panicked during shutdown");
            }
        }
    }
}
