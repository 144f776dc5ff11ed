//! Mechanic location broadcast
//!
//! One broadcaster per signed-in mechanic. Screens lease the cadence they
//! need; the loop runs at the fastest leased cadence and falls back to the
//! dashboard cadence when nothing is leased.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::LocationOptions;
use crate::error::Error;
use crate::geo::{haversine_raw_km, Coordinates};
use crate::profiles::ProfileClient;
use crate::request::{RequestService, RequestStore};

/// One device position reading
#[derive(Debug, Clone, PartialEq)]
pub struct PositionFix {
    pub coordinates: Coordinates,
    pub accuracy_m: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

impl PositionFix {
    pub fn new(coordinates: Coordinates) -> Self {
        Self {
            coordinates,
            accuracy_m: None,
            recorded_at: Utc::now(),
        }
    }
}

/// Where positions come from (the device GPS in the app)
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn current_position(&self) -> Result<PositionFix, Error>;
}

/// Where positions go
#[async_trait]
pub trait PositionSink: Send + Sync {
    async fn publish(&self, fix: &PositionFix) -> Result<(), Error>;
}

/// Writes fixes to the mechanic's profile row and, while they have an
/// active job, to that request.
pub struct TablePositionSink<S: RequestStore> {
    mechanic_id: String,
    profiles: ProfileClient,
    requests: RequestService<S>,
}

impl<S: RequestStore> TablePositionSink<S> {
    pub fn new(mechanic_id: &str, profiles: ProfileClient, requests: RequestService<S>) -> Self {
        Self {
            mechanic_id: mechanic_id.to_string(),
            profiles,
            requests,
        }
    }
}

#[async_trait]
impl<S: RequestStore> PositionSink for TablePositionSink<S> {
    async fn publish(&self, fix: &PositionFix) -> Result<(), Error> {
        self.profiles
            .update_mechanic_location(&self.mechanic_id, fix.coordinates)
            .await?;

        if let Some(active) = self.requests.active_for_mechanic(&self.mechanic_id).await? {
            self.requests
                .update_mechanic_location(&active.id, &self.mechanic_id, fix.coordinates)
                .await?;
        }
        Ok(())
    }
}

/// How often a screen needs fresh positions. Later variants are faster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CadenceProfile {
    Dashboard,
    Map,
    Navigation,
}

impl CadenceProfile {
    pub fn interval(&self, options: &LocationOptions) -> Duration {
        match self {
            CadenceProfile::Dashboard => options.dashboard_interval,
            CadenceProfile::Map => options.map_interval,
            CadenceProfile::Navigation => options.navigation_interval,
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// Lease counts per profile and the resulting cadence
struct LeaseBoard {
    counts: Mutex<[usize; 3]>,
    profile: watch::Sender<CadenceProfile>,
}

impl LeaseBoard {
    fn adjust(&self, profile: CadenceProfile, acquire: bool) {
        let mut counts = self.counts.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let slot = &mut counts[profile.index()];
        if acquire {
            *slot += 1;
        } else {
            *slot = slot.saturating_sub(1);
        }

        let fastest = if counts[CadenceProfile::Navigation.index()] > 0 {
            CadenceProfile::Navigation
        } else if counts[CadenceProfile::Map.index()] > 0 {
            CadenceProfile::Map
        } else {
            CadenceProfile::Dashboard
        };
        self.profile.send_if_modified(|current| {
            if *current == fastest {
                false
            } else {
                *current = fastest;
                true
            }
        });
    }
}

/// Holds a cadence while alive
pub struct CadenceLease {
    board: Arc<LeaseBoard>,
    profile: CadenceProfile,
}

impl CadenceLease {
    pub fn profile(&self) -> CadenceProfile {
        self.profile
    }
}

impl Drop for CadenceLease {
    fn drop(&mut self) {
        self.board.adjust(self.profile, false);
    }
}

/// Runs the broadcast loop
pub struct LocationBroadcaster;

impl LocationBroadcaster {
    /// Start broadcasting on the current tokio runtime. The first fix is
    /// published straight away.
    pub fn spawn(
        source: Arc<dyn PositionSource>,
        sink: Arc<dyn PositionSink>,
        options: LocationOptions,
    ) -> BroadcastHandle {
        let (profile_tx, profile_rx) = watch::channel(CadenceProfile::Dashboard);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let board = Arc::new(LeaseBoard {
            counts: Mutex::new([0; 3]),
            profile: profile_tx,
        });

        info!(
            "starting location broadcast ({:?} dashboard interval)",
            options.dashboard_interval
        );
        let task = tokio::spawn(run(source, sink, options, profile_rx, shutdown_rx));

        BroadcastHandle {
            board,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

/// Control side of a running broadcaster. Dropping it stops the loop.
pub struct BroadcastHandle {
    board: Arc<LeaseBoard>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl BroadcastHandle {
    /// Ask for at least `profile`'s cadence until the lease is dropped
    pub fn lease(&self, profile: CadenceProfile) -> CadenceLease {
        self.board.adjust(profile, true);
        CadenceLease {
            board: Arc::clone(&self.board),
            profile,
        }
    }

    /// The cadence currently in effect
    pub fn current_profile(&self) -> CadenceProfile {
        *self.board.profile.borrow()
    }

    /// Stop the loop and wait for it to exit
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("location broadcast task ended abnormally: {}", e);
            }
        }
        info!("location broadcast stopped");
    }
}

impl Drop for BroadcastHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Last published position and when
struct LastPublish {
    coordinates: Coordinates,
    at: Instant,
}

async fn run(
    source: Arc<dyn PositionSource>,
    sink: Arc<dyn PositionSink>,
    options: LocationOptions,
    mut profile_rx: watch::Receiver<CadenceProfile>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut last: Option<LastPublish> = None;

    loop {
        let profile = *profile_rx.borrow_and_update();
        tick(source.as_ref(), sink.as_ref(), &options, &mut last).await;

        let interval = profile.interval(&options);
        tokio::select! {
            _ = sleep(interval) => {}
            changed = profile_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                debug!("location cadence changed to {:?}", *profile_rx.borrow());
            }
            _ = &mut shutdown_rx => break,
        }
    }
}

async fn tick(
    source: &dyn PositionSource,
    sink: &dyn PositionSink,
    options: &LocationOptions,
    last: &mut Option<LastPublish>,
) {
    let fix = match source.current_position().await {
        Ok(fix) => fix,
        Err(e) => {
            warn!("could not read position: {}", e);
            return;
        }
    };

    if let Some(previous) = last.as_ref() {
        let moved_m = haversine_raw_km(previous.coordinates, fix.coordinates) * 1000.0;
        if moved_m < options.min_displacement_m && previous.at.elapsed() < options.max_silence {
            debug!("skipping position fix, moved {:.1} m", moved_m);
            return;
        }
    }

    match sink.publish(&fix).await {
        Ok(()) => {
            debug!(
                "published position {:.5},{:.5}",
                fix.coordinates.lat, fix.coordinates.lng
            );
            *last = Some(LastPublish {
                coordinates: fix.coordinates,
                at: Instant::now(),
            });
        }
        Err(e) => warn!("could not publish position: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const START: Coordinates = Coordinates { lat: 30.0444, lng: 31.2357 };

    struct FakeGps {
        position: Mutex<Coordinates>,
        failures_left: AtomicUsize,
    }

    impl FakeGps {
        fn at(position: Coordinates) -> Arc<Self> {
            Arc::new(Self {
                position: Mutex::new(position),
                failures_left: AtomicUsize::new(0),
            })
        }

        fn move_to(&self, position: Coordinates) {
            *self.position.lock().unwrap() = position;
        }
    }

    #[async_trait]
    impl PositionSource for FakeGps {
        async fn current_position(&self) -> Result<PositionFix, Error> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::general("no gps signal"));
            }
            Ok(PositionFix::new(*self.position.lock().unwrap()))
        }
    }

    #[derive(Default)]
    struct Recorder {
        fixes: Mutex<Vec<PositionFix>>,
    }

    impl Recorder {
        fn count(&self) -> usize {
            self.fixes.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PositionSink for Recorder {
        async fn publish(&self, fix: &PositionFix) -> Result<(), Error> {
            self.fixes.lock().unwrap().push(fix.clone());
            Ok(())
        }
    }

    fn every_fix() -> LocationOptions {
        LocationOptions {
            min_displacement_m: 0.0,
            ..LocationOptions::default()
        }
    }

    async fn settle() {
        sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn runs_at_fastest_leased_cadence() {
        let sink = Arc::new(Recorder::default());
        let handle = LocationBroadcaster::spawn(FakeGps::at(START), sink.clone(), every_fix());
        settle().await;
        assert_eq!(sink.count(), 1);

        sleep(Duration::from_secs(61)).await;
        assert_eq!(sink.count(), 2);

        let map = handle.lease(CadenceProfile::Map);
        assert_eq!(handle.current_profile(), CadenceProfile::Map);
        settle().await;
        assert_eq!(sink.count(), 3);

        sleep(Duration::from_secs(12)).await;
        assert_eq!(sink.count(), 5);

        let dashboard = handle.lease(CadenceProfile::Dashboard);
        assert_eq!(handle.current_profile(), CadenceProfile::Map);

        drop(map);
        assert_eq!(handle.current_profile(), CadenceProfile::Dashboard);
        settle().await;
        let after_release = sink.count();
        sleep(Duration::from_secs(30)).await;
        assert_eq!(sink.count(), after_release);

        drop(dashboard);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn skips_small_moves_until_silence_runs_out() {
        let gps = FakeGps::at(START);
        let sink = Arc::new(Recorder::default());
        let handle = LocationBroadcaster::spawn(gps.clone(), sink.clone(), LocationOptions::default());
        let _map = handle.lease(CadenceProfile::Map);
        settle().await;
        assert_eq!(sink.count(), 1);

        sleep(Duration::from_secs(30)).await;
        assert_eq!(sink.count(), 1);

        sleep(Duration::from_secs(31)).await;
        assert_eq!(sink.count(), 2);

        gps.move_to(Coordinates { lat: 30.0454, lng: 31.2357 });
        sleep(Duration::from_secs(5)).await;
        assert_eq!(sink.count(), 3);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn source_errors_do_not_stop_the_loop() {
        let gps = FakeGps::at(START);
        gps.failures_left.store(2, Ordering::SeqCst);
        let sink = Arc::new(Recorder::default());
        let handle = LocationBroadcaster::spawn(gps, sink.clone(), every_fix());
        let _nav = handle.lease(CadenceProfile::Navigation);

        sleep(Duration::from_secs(7)).await;
        assert!(sink.count() >= 1);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_publishing() {
        let sink = Arc::new(Recorder::default());
        let handle = LocationBroadcaster::spawn(FakeGps::at(START), sink.clone(), every_fix());
        settle().await;
        handle.shutdown().await;

        let count = sink.count();
        sleep(Duration::from_secs(300)).await;
        assert_eq!(sink.count(), count);
    }
}
