//! The state synchronization engine: owns the store, router, command
//! pipeline and supervisor tasks, and exposes snapshots plus intent calls.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use time::UtcOffset;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::commands::{CommandPipeline, Intent, IntentSender, DEFAULT_DEBOUNCE};
use crate::error::LinkError;
use crate::router::Router;
use crate::state::{DeviceState, StateStore, StoreHandle, DEFAULT_HISTORY_LEN};
use crate::supervisor::{
    Backoff, LinkState, Supervisor, DEFAULT_MAX_BACKOFF, DEFAULT_MIN_BACKOFF,
};
use crate::topics::{Signal, TopicRegistry};
use crate::transport::{Transport, TransportEvent};

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub registry: TopicRegistry,
    pub history_len: usize,
    pub debounce: Duration,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    /// Offset `last_watered_at` is rendered in.
    pub display_offset: UtcOffset,
}

impl EngineOptions {
    pub fn new(registry: TopicRegistry) -> Self {
        Self {
            registry,
            history_len: DEFAULT_HISTORY_LEN,
            debounce: DEFAULT_DEBOUNCE,
            min_backoff: DEFAULT_MIN_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            display_offset: UtcOffset::UTC,
        }
    }
}

type PendingSupervisor = (Supervisor, mpsc::UnboundedReceiver<LinkError>);

pub struct Engine {
    intents: IntentSender,
    state: watch::Receiver<Arc<DeviceState>>,
    slider: watch::Receiver<f32>,
    link: watch::Receiver<LinkState>,
    shutdown: watch::Sender<bool>,
    supervisor: Mutex<Option<PendingSupervisor>>,
    supervisor_task: Mutex<Option<JoinHandle<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Engine {
    /// Spawn the store, inbound and command tasks. The transport is not
    /// touched until [`Engine::connect`].
    pub fn start(
        options: EngineOptions,
        transport: Arc<dyn Transport>,
        events: mpsc::Receiver<TransportEvent>,
    ) -> Self {
        let registry = options.registry;

        let (store, state) = StateStore::new(options.history_len);
        let (store_tx, store_rx) = mpsc::unbounded_channel();

        let (pipeline, slider) = CommandPipeline::new(
            Arc::clone(&transport),
            registry.request_topic(),
            options.debounce,
            store_tx.clone(),
        );
        let (intents, intents_rx) = mpsc::unbounded_channel();

        let (lost_tx, lost_rx) = mpsc::unbounded_channel();
        let (supervisor, link) = Supervisor::new(
            transport,
            registry.subscriptions(),
            registry.topic(Signal::RespondAll).name,
            intents.clone(),
            Backoff::new(options.min_backoff, options.max_backoff),
        );

        let router = Router::new(registry.clone(), options.display_offset);
        let workers = vec![
            tokio::spawn(store.run(store_rx)),
            tokio::spawn(inbound(router, events, store_tx, lost_tx)),
            tokio::spawn(pipeline.run(intents_rx)),
        ];

        info!(
            root = registry.root(),
            profile = ?registry.profile(),
            "engine started"
        );

        let (shutdown, _) = watch::channel(false);
        Self {
            intents,
            state,
            slider,
            link,
            shutdown,
            supervisor: Mutex::new(Some((supervisor, lost_rx))),
            supervisor_task: Mutex::new(None),
            workers: Mutex::new(workers),
        }
    }

    // -- intents ------------------------------------------------------------

    /// Start keeping the link up. Later calls are no-ops.
    pub fn connect(&self) {
        let Some((supervisor, lost)) = lock(&self.supervisor).take() else {
            debug!("connect already requested");
            return;
        };
        let task = tokio::spawn(supervisor.run(lost, self.shutdown.subscribe()));
        *lock(&self.supervisor_task) = Some(task);
    }

    pub fn water(&self) {
        self.send(Intent::Water);
    }

    pub fn request_last_water_date(&self) {
        self.send(Intent::RequestLastWaterDate);
    }

    pub fn toggle_light_override(&self) {
        self.send(Intent::ToggleLightOverride);
    }

    /// Slider position in `0.0..=1.0`; published after the debounce window.
    pub fn set_light_level(&self, value: f32) {
        self.send(Intent::SetLightLevel(value));
    }

    fn send(&self, intent: Intent) {
        if self.intents.send(intent).is_err() {
            warn!(?intent, "command pipeline stopped, intent dropped");
        }
    }

    // -- observation --------------------------------------------------------

    pub fn snapshot(&self) -> Arc<DeviceState> {
        Arc::clone(&self.state.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<DeviceState>> {
        self.state.clone()
    }

    pub fn link_state(&self) -> LinkState {
        *self.link.borrow()
    }

    pub fn watch_link(&self) -> watch::Receiver<LinkState> {
        self.link.clone()
    }

    /// Last slider value accepted by the pipeline, before debouncing.
    pub fn light_slider(&self) -> f32 {
        *self.slider.borrow()
    }

    // -- teardown -----------------------------------------------------------

    /// Stop the supervisor (unsubscribing and disconnecting if the link is
    /// up), then the remaining tasks. Pending slider values are discarded.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let task = lock(&self.supervisor_task).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("supervisor task failed: {e}");
            }
        }
        for worker in lock(&self.workers).drain(..) {
            worker.abort();
        }
        info!("engine stopped");
    }
}

/// Route transport events in delivery order.
async fn inbound(
    router: Router,
    mut events: mpsc::Receiver<TransportEvent>,
    store: StoreHandle,
    lost: mpsc::UnboundedSender<LinkError>,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Message { topic, payload } => match router.route(&topic, &payload) {
                Ok(Some(update)) => {
                    let _ = store.send(update);
                }
                Ok(None) => trace!(%topic, "no state for message"),
                Err(e) => warn!("{e}"),
            },
            TransportEvent::ConnectionLost(cause) => {
                let _ = lost.send(LinkError::ConnectionLost(cause));
            }
            TransportEvent::DeliveryComplete(pkid) => debug!(pkid, "delivery complete"),
        }
    }
    debug!("transport event stream closed");
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use crate::topics::DeviceProfile;
    use std::collections::VecDeque;

    fn planter_engine() -> (Engine, Arc<MockTransport>) {
        let (mock, events) = MockTransport::new();
        let options = EngineOptions::new(TopicRegistry::new("planter", DeviceProfile::Planter));
        let engine = Engine::start(options, mock.clone(), events);
        (engine, mock)
    }

    async fn ready_engine() -> (Engine, Arc<MockTransport>) {
        let (engine, mock) = planter_engine();
        engine.connect();
        wait_ms(1).await;
        assert_eq!(engine.link_state(), LinkState::Ready);
        (engine, mock)
    }

    async fn wait_ms(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    // -- lifecycle ----------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn idle_until_connect() {
        let (engine, mock) = planter_engine();
        wait_ms(10).await;
        assert_eq!(engine.link_state(), LinkState::Disconnected);
        assert_eq!(mock.connect_attempts(), 0);
        assert_eq!(*engine.snapshot(), DeviceState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_subscribes_and_bootstraps() {
        let (engine, mock) = ready_engine().await;
        assert_eq!(mock.subscriptions().len(), 7);
        assert_eq!(mock.payloads(), vec!["D"]);

        // Second connect does nothing.
        engine.connect();
        wait_ms(1).await;
        assert_eq!(mock.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_after_loss() {
        let (engine, mock) = ready_engine().await;
        let mut link = engine.watch_link();
        link.borrow_and_update();

        mock.drop_connection("keep-alive timeout").await;
        link.changed().await.unwrap();
        wait_ms(1).await;

        assert_eq!(engine.link_state(), LinkState::Ready);
        assert_eq!(mock.connect_attempts(), 2);
        assert_eq!(mock.subscriptions().len(), 14);
        assert_eq!(mock.payloads(), vec!["D", "D"]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_unsubscribes_and_disconnects() {
        let (engine, mock) = ready_engine().await;
        engine.shutdown().await;

        assert_eq!(engine.link_state(), LinkState::Disconnected);
        assert_eq!(mock.unsubscriptions().len(), 7);
        assert_eq!(mock.disconnects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_without_connect_is_quiet() {
        let (engine, mock) = planter_engine();
        engine.shutdown().await;
        assert_eq!(mock.disconnects(), 0);
        // Intents after shutdown are dropped, not panics.
        engine.water();
    }

    // -- commands -----------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn water_publishes_w_then_d() {
        let (engine, mock) = ready_engine().await;
        mock.clear_published();

        engine.water();
        wait_ms(1).await;
        assert_eq!(mock.payloads(), vec!["W", "D"]);
        assert!(mock
            .published()
            .iter()
            .all(|(topic, _)| topic == "planter/request"));
    }

    #[tokio::test(start_paused = true)]
    async fn slider_burst_is_debounced_end_to_end() {
        let (engine, mock) = ready_engine().await;
        mock.clear_published();

        for v in [0.1, 0.4, 0.45] {
            engine.set_light_level(v);
            wait_ms(50).await;
        }
        assert_eq!(engine.light_slider(), 0.45);
        assert!(mock.payloads().is_empty());

        wait_ms(500).await;
        assert_eq!(mock.payloads(), vec!["V45"]);
    }

    #[tokio::test(start_paused = true)]
    async fn other_intents_publish_their_codes() {
        let (engine, mock) = ready_engine().await;
        mock.clear_published();
        engine.toggle_light_override();
        engine.request_last_water_date();
        wait_ms(1).await;
        assert_eq!(mock.payloads(), vec!["L", "D"]);
    }

    // -- inbound ------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn telemetry_reaches_snapshot() {
        let (engine, mock) = ready_engine().await;
        mock.deliver("planter/light", "812").await;
        mock.deliver("planter/moisture", "41.5").await;
        mock.deliver("planter/respond/override", "1").await;
        mock.deliver("planter/respond/light", "64").await;
        mock.deliver("planter/respond/date", "1693526400").await;
        wait_ms(1).await;

        let snap = engine.snapshot();
        assert_eq!(snap.light_lux, "812");
        assert_eq!(snap.moisture_history, VecDeque::from(vec![41.5]));
        assert!(snap.light_override);
        assert_eq!(snap.light_level_percent, 64);
        assert_eq!(snap.last_watered_at, "Fri Sep 01 00:00:00 2023");
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_moisture_leaves_history_unchanged() {
        let (engine, mock) = ready_engine().await;
        mock.deliver("planter/moisture", "12.5").await;
        wait_ms(1).await;
        let before = engine.snapshot();

        mock.deliver("planter/moisture", "soggy").await;
        wait_ms(1).await;
        assert_eq!(engine.snapshot(), before);

        mock.deliver("planter/moisture", "13").await;
        wait_ms(1).await;
        assert_eq!(
            engine.snapshot().moisture_history,
            VecDeque::from(vec![12.5, 13.0])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn water_ack_confirms_until_next_water() {
        let (engine, mock) = ready_engine().await;
        mock.deliver("planter/respond", "W ok").await;
        wait_ms(1).await;
        assert!(engine.snapshot().water_confirmed);

        // Sticky across unrelated traffic.
        mock.deliver("planter/respond", "L 1").await;
        wait_ms(1).await;
        assert!(engine.snapshot().water_confirmed);

        engine.water();
        wait_ms(1).await;
        assert!(!engine.snapshot().water_confirmed);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_see_changes() {
        let (engine, mock) = ready_engine().await;
        let mut rx = engine.subscribe();
        rx.borrow_and_update();

        mock.deliver("planter/temperature", "21.4").await;
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().temperature, "21.4");
    }
}
