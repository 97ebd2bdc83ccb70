//! Session metrics exporter: every scrape recomputes from the admin API and
//! degrades to a fixed down payload instead of failing.

pub mod collect;
pub mod labels;
pub mod render;
pub mod server;

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, error};

pub use collect::{Collector, ExporterSnapshot, LoginEvent, SessionRecord, UserIdentity};
pub use render::{render, FALLBACK};
pub use server::{router, serve};

/// Shared by every request handler; holds configuration only.
#[derive(Clone)]
pub struct Exporter {
    collector: Arc<Collector>,
}

impl Exporter {
    pub fn new(collector: Collector) -> Self {
        Self {
            collector: Arc::new(collector),
        }
    }

    /// Never fails: any error, including a panic inside collection, turns
    /// into [`FALLBACK`].
    pub async fn render_metrics(&self) -> String {
        let started = Instant::now();
        let collector = Arc::clone(&self.collector);
        let outcome = tokio::spawn(async move { collector.collect().await }).await;

        let body = match outcome {
            Ok(Ok(snapshot)) => render(&snapshot, now_millis()),
            Ok(Err(e)) => {
                error!("Scrape failed, serving fallback: {}", e);
                FALLBACK.to_string()
            }
            Err(e) => {
                error!("Scrape task aborted, serving fallback: {}", e);
                FALLBACK.to_string()
            }
        };
        debug!("Scrape rendered in {:?}", started.elapsed());
        body
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
