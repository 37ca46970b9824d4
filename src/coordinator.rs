//! The single task that owns scanning state.
//!
//! Location polling, passive detection and campaign rounds are deadlines this
//! task sleeps toward. Commands arrive over a channel and are only handled
//! between ticks, so a round in flight always completes before a stop takes
//! effect. While a campaign exists the idle loops are skipped entirely.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tracing::{debug, error, info, warn};

use crate::{
    campaign::{AbortReason, Campaign, Stage},
    config::ScanConfig,
    db::RecordStore,
    error::ScanError,
    model::AccessPoint,
    scheduler::ScanScheduler,
    source::{PositionSource, RadioSource},
    status::{self, Progress, Status},
    tracker::{LabelRequest, LocationTracker},
};

#[derive(Debug)]
pub enum Command {
    Start,
    Stop,
    Label {
        location_key: String,
        label: Option<String>,
    },
    Shutdown,
}

/// Cheap, cloneable access to a running coordinator.
#[derive(Clone)]
pub struct Handle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<Status>,
}

impl Handle {
    pub async fn start(&self) -> Result<()> {
        self.send(Command::Start).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.send(Command::Stop).await
    }

    pub async fn label(&self, location_key: String, label: Option<String>) -> Result<()> {
        self.send(Command::Label {
            location_key,
            label,
        })
        .await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }

    pub fn status(&self) -> Status {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.status.clone()
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow!("coordinator has shut down"))
    }
}

pub struct Coordinator {
    radio: Arc<dyn RadioSource>,
    position: Arc<dyn PositionSource>,
    store: Arc<dyn RecordStore>,
    config: ScanConfig,

    tracker: LocationTracker,
    scheduler: ScanScheduler,
    campaign: Option<Campaign>,

    progress: Progress,
    visible: Vec<AccessPoint>,
    detection_problem: Option<ScanError>,
    location_problem: Option<ScanError>,
    campaign_problem: Option<ScanError>,

    next_location: Instant,
    next_detection: Instant,
    next_round: Instant,
    cooldown_until: Option<Instant>,

    status: watch::Sender<Status>,
    labels: mpsc::Sender<LabelRequest>,
}

/// Starts a coordinator on the current runtime. Label requests for new
/// locations come out of the returned receiver.
pub fn spawn(
    radio: Arc<dyn RadioSource>,
    position: Arc<dyn PositionSource>,
    store: Arc<dyn RecordStore>,
    config: ScanConfig,
) -> (Handle, mpsc::Receiver<LabelRequest>, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::channel(16);
    let (label_tx, label_rx) = mpsc::channel(8);
    let (status_tx, status_rx) = watch::channel(Status::default());

    let now = Instant::now();
    let coordinator = Coordinator {
        radio,
        position,
        store,
        scheduler: ScanScheduler::new(config.detection_interval(), config.degraded_interval()),
        config,
        tracker: LocationTracker::new(),
        campaign: None,
        progress: Progress::Idle,
        visible: Vec::new(),
        detection_problem: None,
        location_problem: None,
        campaign_problem: None,
        next_location: now,
        next_detection: now,
        next_round: now,
        cooldown_until: None,
        status: status_tx,
        labels: label_tx,
    };

    let task = tokio::spawn(coordinator.run(command_rx));
    let handle = Handle {
        commands: command_tx,
        status: status_rx,
    };
    (handle, label_rx, task)
}

impl Coordinator {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        info!("coordinator started");
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command).await,
                },
                _ = sleep_until(deadline) => self.tick().await,
            }
            self.publish();
        }
        self.shutdown();
        self.publish();
        info!("coordinator stopped");
    }

    fn next_deadline(&self) -> Instant {
        match self.campaign.as_ref().map(Campaign::stage) {
            None => self.next_location.min(self.next_detection),
            Some(Stage::Sampling) => self.next_round,
            Some(Stage::Cooldown) => self.cooldown_until.unwrap_or_else(Instant::now),
            Some(_) => Instant::now(),
        }
    }

    async fn handle(&mut self, command: Command) {
        debug!(?command, "command");
        match command {
            Command::Start => self.start().await,
            Command::Stop => self.stop(),
            Command::Label {
                location_key,
                label,
            } => {
                self.tracker.resolve_label(&location_key, label.as_deref());
            }
            Command::Shutdown => {}
        }
    }

    async fn tick(&mut self) {
        let now = Instant::now();
        match self.campaign.as_ref().map(Campaign::stage) {
            None => {
                if now >= self.next_location {
                    self.refresh_location().await;
                    self.next_location = Instant::now() + self.config.location_interval();
                }
                if now >= self.next_detection {
                    self.detect().await;
                    self.next_detection = Instant::now() + self.scheduler.period();
                }
            }
            Some(Stage::Sampling) => {
                if now >= self.next_round {
                    self.sample().await;
                    self.next_round = Instant::now() + self.config.sample_interval();
                }
            }
            Some(Stage::Cooldown) => {
                if self.cooldown_until.map_or(true, |x| now >= x) {
                    self.finish_campaign();
                }
            }
            Some(stage) => {
                error!(%stage, "campaign left in an unexpected stage");
                self.campaign = None;
                self.tracker.release();
                self.resume();
            }
        }
    }

    async fn refresh_location(&mut self) {
        match self.tracker.refresh(&*self.position, &*self.store).await {
            Ok(request) => {
                self.location_problem = None;
                if let Some(request) = request {
                    self.request_label(request);
                }
            }
            Err(e) => {
                debug!("location unavailable: {e}");
                self.location_problem = Some(e);
            }
        }
    }

    async fn detect(&mut self) {
        let result = self
            .scheduler
            .tick(
                &*self.radio,
                &*self.position,
                self.tracker.anchor(),
                &*self.store,
            )
            .await;
        match result {
            Ok(visible) => {
                self.visible = visible;
                self.detection_problem = None;
                self.campaign_problem = None;
                self.progress = Progress::Idle;
            }
            Err(e) => {
                self.visible.clear();
                self.detection_problem = Some(e);
            }
        }
    }

    async fn start(&mut self) {
        if self.campaign.is_some() {
            warn!("campaign already running");
            return;
        }

        let mut campaign = Campaign::new(self.config.samples);
        let result = campaign
            .begin(
                &*self.radio,
                &*self.position,
                &mut self.tracker,
                &*self.store,
            )
            .await;

        match result {
            Ok(request) => {
                if let Some(request) = request {
                    self.request_label(request);
                }
                self.visible.clear();
                self.detection_problem = None;
                self.location_problem = None;
                self.campaign_problem = None;
                self.progress = Progress::Sampling {
                    round: 0,
                    target: campaign.target(),
                };
                self.next_round = Instant::now();
                self.campaign = Some(campaign);
            }
            Err(e) => {
                let reason = match campaign.stage() {
                    Stage::Aborted(reason) => reason,
                    _ => AbortReason::from(&e),
                };
                warn!(%reason, "campaign could not start: {e}");
                self.aborted(reason, Some(e));
            }
        }
    }

    async fn sample(&mut self) {
        let Some(campaign) = self.campaign.as_mut() else {
            return;
        };
        let result = campaign
            .round(
                &*self.radio,
                &*self.position,
                self.tracker.anchor(),
                &*self.store,
            )
            .await;
        let (round, target, stage) = (campaign.rounds(), campaign.target(), campaign.stage());

        match result {
            Ok(outcome) => {
                self.visible = outcome.visible;
                self.progress = Progress::Sampling { round, target };
                if stage == Stage::Aggregate {
                    self.aggregate().await;
                }
            }
            Err(e) => {
                self.campaign = None;
                let reason = match stage {
                    Stage::Aborted(reason) => reason,
                    _ => AbortReason::from(&e),
                };
                warn!(%reason, round, "campaign aborted: {e}");
                self.aborted(reason, Some(e));
            }
        }
    }

    async fn aggregate(&mut self) {
        let Some(campaign) = self.campaign.as_mut() else {
            return;
        };
        match campaign.aggregate(self.tracker.anchor(), &*self.store).await {
            Ok(report) => {
                self.progress = Progress::Complete(report);
                self.visible.clear();
                self.cooldown_until = Some(Instant::now() + self.config.cooldown());
            }
            Err(e) => {
                error!("aggregation failed: {e}");
                self.campaign = None;
                self.tracker.release();
                self.progress = Progress::Idle;
                self.resume();
            }
        }
    }

    fn stop(&mut self) {
        match self.campaign.as_ref().map(Campaign::stage) {
            None => debug!("no campaign to stop"),
            Some(Stage::Cooldown) => self.finish_campaign(),
            Some(_) => {
                if let Some(mut campaign) = self.campaign.take() {
                    if let Err(e) = campaign.abort(AbortReason::Stopped) {
                        warn!("{e}");
                    }
                }
                self.aborted(AbortReason::Stopped, None);
            }
        }
    }

    /// Common tail of every abort: the lock goes and so does the anchor.
    fn aborted(&mut self, reason: AbortReason, problem: Option<ScanError>) {
        self.campaign = None;
        self.tracker.release();
        self.tracker.reset();
        self.visible.clear();
        self.progress = Progress::Aborted(reason);
        self.campaign_problem = problem;
        self.resume();
    }

    fn finish_campaign(&mut self) {
        if let Some(mut campaign) = self.campaign.take() {
            if let Err(e) = campaign.finish() {
                warn!("{e}");
            }
        }
        self.cooldown_until = None;
        self.tracker.release();
        self.progress = Progress::Idle;
        self.campaign_problem = None;
        info!("campaign done");
        self.resume();
    }

    fn resume(&mut self) {
        let now = Instant::now();
        self.next_location = now;
        self.next_detection = now;
    }

    fn shutdown(&mut self) {
        match self.campaign.as_ref().map(Campaign::stage) {
            Some(Stage::Cooldown) => self.finish_campaign(),
            Some(_) => self.stop(),
            None => {}
        }
    }

    fn request_label(&self, request: LabelRequest) {
        info!(location = %request.location_key, "label requested");
        if let Err(e) = self.labels.try_send(request) {
            warn!("label request not delivered: {e}");
        }
    }

    fn publish(&self) {
        let problems = [
            &self.detection_problem,
            &self.location_problem,
            &self.campaign_problem,
        ];
        let status = status::project(
            self.tracker.anchor(),
            &self.visible,
            self.progress,
            problems.into_iter().flatten(),
        );
        self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }
}
