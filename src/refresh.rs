//! Fixed-interval refresh loop.
//!
//! Each tick drains pending ingest events into the state, builds a
//! [`DashboardView`] from the in-memory registry and hands it to a
//! [`Renderer`]. Ticks never overlap: a tick that comes due while the previous
//! one is still running is skipped, not queued.

use log::{debug, info, warn};
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

use crate::database::Database;
use crate::ingest::IngestEvent;
use crate::state::AppState;
use crate::view::DashboardView;

pub trait Renderer {
    fn render(&mut self, view: &DashboardView);
}

/// Liveness of the database link, polled on every tick
pub trait ConnectionStatus: Send + Sync {
    fn is_connected(&self) -> bool;
}

impl ConnectionStatus for Database {
    fn is_connected(&self) -> bool {
        !self.is_closed()
    }
}

/// Redraws the whole view on a terminal
#[derive(Debug)]
pub struct TerminalRenderer<W = std::io::Stdout> {
    out: W,
    /// Clear the screen before each frame
    clear: bool,
}

impl TerminalRenderer {
    pub fn stdout(clear: bool) -> Self {
        TerminalRenderer::new(std::io::stdout(), clear)
    }
}

impl<W: Write> TerminalRenderer<W> {
    pub fn new(out: W, clear: bool) -> Self {
        TerminalRenderer { out, clear }
    }
}

impl<W: Write> Renderer for TerminalRenderer<W> {
    fn render(&mut self, view: &DashboardView) {
        let clear = if self.clear { "\x1B[2J\x1B[H" } else { "" };
        let result = write!(self.out, "{}{}", clear, view).and_then(|_| self.out.flush());

        if let Err(e) = result {
            debug!("Failed to write frame: {}", e);
        }
    }
}

#[derive(Clone)]
pub struct RefreshLoop {
    pub interval: Duration,
    /// Unique tag of the sensor shown in detail
    pub selected: Option<String>,
    pub chart_ticks: usize,
    /// Database link whose state is mirrored into the sidebar
    pub database: Option<Arc<dyn ConnectionStatus>>,
}

impl RefreshLoop {
    /// One tick: apply pending events, then render
    pub fn tick<R: Renderer>(
        &self,
        state: &mut AppState,
        events: &mut mpsc::Receiver<IngestEvent>,
        renderer: &mut R,
    ) {
        state.drain(events);
        if let Some(database) = &self.database {
            let connected = database.is_connected();
            if state.database_connected && !connected {
                warn!("Database connection lost");
            }
            state.database_connected = connected;
        }
        let view = DashboardView::build(
            state,
            self.selected.as_deref(),
            OffsetDateTime::now_utc(),
            self.chart_ticks,
        );
        renderer.render(&view);
    }

    /// Tick until `shutdown` resolves. Returns the number of ticks run.
    pub async fn run<R, F>(
        &self,
        state: &mut AppState,
        events: &mut mpsc::Receiver<IngestEvent>,
        renderer: &mut R,
        shutdown: F,
    ) -> u64
    where
        R: Renderer,
        F: Future<Output = ()>,
    {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!("Refreshing every {} ms", self.interval.as_millis());
        let mut ticks = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(state, events, renderer);
                    ticks += 1;
                }
                _ = &mut shutdown => {
                    debug!("Refresh loop stopping after {} ticks", ticks);
                    break;
                }
            }
        }

        ticks
    }
}
