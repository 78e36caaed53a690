use std::sync::Arc;
use std::time::Duration;
use futures::{SinkExt, StreamExt};
use futures::channel::mpsc::{channel, Receiver, Sender};
use log::{debug, error, info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::device::constants::SCAN_PERIOD;
use crate::device::payload::characteristic_payload;
use crate::device::platform::BlePlatform;
use crate::device::relay::EventRelay;
use crate::device::types::{
    ConnectionState, DeviceId, EventKind, GattStatus, PlatformEvent, ProfileState, ScanResult,
    ScanSettings,
};
use crate::error::DeviceError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerOptions {
    pub scan_period: Duration,
    pub scan_settings: ScanSettings,
    pub auto_connect: bool,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        ControllerOptions {
            scan_period: Duration::from_millis(SCAN_PERIOD),
            scan_settings: ScanSettings::default(),
            auto_connect: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerCommand {
    StartScan,
    StopScan,
    ReadCharacteristic(Uuid),
    ScanTimeout { session: u64 },
}

/// One discovery window. Dropping out of `ScanController::session` ends it.
#[derive(Debug)]
pub struct ScanSession {
    pub id: u64,
    pub started_at: Instant,
    pub duration: Duration,
    // set once the first scan result has been turned into a connection attempt
    claimed: bool,
    timer_cancel: CancellationToken,
}

impl ScanSession {
    fn new(id: u64, duration: Duration) -> Self {
        ScanSession {
            id,
            started_at: Instant::now(),
            duration,
            claimed: false,
            timer_cancel: CancellationToken::new(),
        }
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed
    }
}

/// The GATT handle of the device picked from a scan session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub device: DeviceId,
    pub state: ConnectionState,
    pub session: u64,
}

impl Connection {
    fn new(device: DeviceId, session: u64) -> Self {
        Connection { device, state: ConnectionState::Disconnected, session }
    }

    fn transition(&mut self, next: ConnectionState) -> Result<(), DeviceError> {
        if !self.state.can_transition_to(next) {
            return Err(DeviceError::InvalidTransition { from: self.state, to: next });
        }

        debug!("Connection to {}: {} -> {}", self.device, self.state, next);
        self.state = next;
        Ok(())
    }
}

pub struct ScanController {
    platform: Arc<dyn BlePlatform>,
    relay: EventRelay,
    options: ControllerOptions,
    commands: Sender<ControllerCommand>,
    session: Option<ScanSession>,
    connection: Option<Connection>,
    last_session_id: u64,
}

impl ScanController {
    /// `commands` must feed back into [`ScanController::handle_command`]; the
    /// auto-stop timer reports through it.
    pub fn new(
        platform: Arc<dyn BlePlatform>,
        relay: EventRelay,
        options: ControllerOptions,
        commands: Sender<ControllerCommand>,
    ) -> Self {
        ScanController {
            platform,
            relay,
            options,
            commands,
            session: None,
            connection: None,
            last_session_id: 0,
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&ScanSession> {
        self.session.as_ref()
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.as_ref().map_or(ConnectionState::Disconnected, |connection| connection.state)
    }

    /// Starts a new discovery window. An active window is superseded, its
    /// auto-stop timer is cancelled.
    pub async fn start_scan(&mut self) {
        if let Some(previous) = self.session.take() {
            info!("Scan session {} is still active; restarting", previous.id);
            previous.timer_cancel.cancel();
            if let Err(err) = self.platform.stop_scan().await {
                warn!("Failed to stop previous scan: {}", err);
            }
        }

        self.last_session_id += 1;
        let session = ScanSession::new(self.last_session_id, self.options.scan_period);
        self.schedule_auto_stop(&session);
        self.session = Some(session);

        match self.platform.start_scan(&self.options.scan_settings).await {
            Ok(()) => info!(
                "Scan started ({}, {})",
                self.options.scan_settings.scan_mode,
                humantime::format_duration(self.options.scan_period),
            ),
            Err(err) => warn!("Failed to start scan: {}", err),
        }
    }

    pub async fn stop_scan(&mut self) {
        if let Some(session) = self.session.take() {
            session.timer_cancel.cancel();
            info!("Scan session {} stopped after {}ms", session.id, session.started_at.elapsed().as_millis());
        }

        if let Err(err) = self.platform.stop_scan().await {
            warn!("Failed to stop scan: {}", err);
        }
    }

    pub async fn read_characteristic(&mut self, uuid: Uuid) -> Result<(), DeviceError> {
        let device = match &self.connection {
            Some(connection) if connection.state == ConnectionState::Connected => connection.device.clone(),
            _ => return Err(DeviceError::NotConnected),
        };

        self.platform.read_characteristic(&device, uuid).await
    }

    pub async fn handle_command(&mut self, command: ControllerCommand) {
        match command {
            ControllerCommand::StartScan => self.start_scan().await,
            ControllerCommand::StopScan => self.stop_scan().await,
            ControllerCommand::ReadCharacteristic(uuid) => {
                if let Err(err) = self.read_characteristic(uuid).await {
                    warn!("Failed to read characteristic {}: {}", uuid, err);
                }
            },
            ControllerCommand::ScanTimeout { session } => {
                if self.session.as_ref().map(|current| current.id) == Some(session) {
                    self.stop_scan().await;
                } else {
                    debug!("Ignoring timeout of stale scan session {}", session);
                }
            },
        }
    }

    pub async fn handle_platform_event(&mut self, event: PlatformEvent) {
        match event {
            PlatformEvent::ScanResult(result) => self.on_scan_result(result).await,
            PlatformEvent::BatchScanResults(results) => {
                error!("Wasted {} batched scan results!", results.len());
            },
            PlatformEvent::ScanFailed(failure) => {
                warn!("Scan failed: {}", failure);
            },
            PlatformEvent::ConnectionStateChanged { device, status, state } => {
                self.on_connection_state_change(device, status, state).await;
            },
            PlatformEvent::ServicesDiscovered { device, status } => {
                if !self.is_current_device(&device) {
                    debug!("Ignoring services of {}", device);
                } else if status.is_success() {
                    self.relay.emit(EventKind::ServicesDiscovered, None);
                } else {
                    warn!("Service discovery on {} failed with status {}", device, status);
                }
            },
            PlatformEvent::CharacteristicRead { device, uuid, value, status } => {
                if !self.is_current_device(&device) {
                    debug!("Ignoring read of {} on {}", uuid, device);
                    return;
                }

                if !status.is_success() {
                    debug!("Read of {} on {} failed with status {}", uuid, device, status);
                    return;
                }

                self.relay.emit(EventKind::DataAvailable, characteristic_payload(&uuid, &value));
            },
        }
    }

    async fn on_scan_result(&mut self, result: ScanResult) {
        info!(
            "Scan result: {} {} rssi={:?}",
            result.device,
            result.local_name.as_deref().unwrap_or("NONE"),
            result.rssi,
        );

        let session = match self.session.as_mut() {
            Some(session) => session,
            None => {
                debug!("No active scan session, dropping result of {}", result.device);
                return;
            },
        };

        if session.claimed {
            debug!("Scan session {} already picked a device, dropping {}", session.id, result.device);
            return;
        }
        session.claimed = true;
        let session_id = session.id;

        if let Some(previous) = &self.connection {
            warn!("Releasing {} connection to {}", previous.state, previous.device);
            self.disconnect().await;
        }

        let mut connection = Connection::new(result.device.clone(), session_id);
        if let Err(err) = connection.transition(ConnectionState::Connecting) {
            warn!("{}", err);
            return;
        }
        self.connection = Some(connection);

        info!("Connecting to {} (auto connect: {})", result.device, self.options.auto_connect);
        if let Err(err) = self.platform.connect(&result.device, self.options.auto_connect).await {
            warn!("Connecting to {} failed: {}", result.device, err);
            self.disconnect().await;
        }
    }

    async fn on_connection_state_change(&mut self, device: DeviceId, status: GattStatus, state: ProfileState) {
        let connection = match self.connection.as_mut() {
            Some(connection) if connection.device == device => connection,
            _ => {
                debug!("Ignoring state change of {} to {:?}", device, state);
                return;
            },
        };

        if !status.is_success() {
            info!("Connection state change of {} reported status {}", device, status);
        }

        match state {
            ProfileState::Connected => {
                if let Err(err) = connection.transition(ConnectionState::Connected) {
                    warn!("{}", err);
                    return;
                }

                info!("Connected to GATT server.");
                self.relay.emit(EventKind::Connected, None);

                let discovery = self.platform.discover_services(&device).await;
                info!("Attempting to start service discovery: {}", discovery.is_ok());
                if let Err(err) = discovery {
                    warn!("Service discovery on {} could not be started: {}", device, err);
                }
            },
            ProfileState::Disconnected => self.disconnect().await,
        }
    }

    // Connecting and connected both end here; a failed attempt looks like a close.
    async fn disconnect(&mut self) {
        let mut connection = match self.connection.take() {
            Some(connection) => connection,
            None => return,
        };
        let from = connection.state;

        if let Err(err) = self.platform.disconnect(&connection.device).await {
            warn!("Failed to release {}: {}", connection.device, err);
        }

        if let Err(err) = connection.transition(ConnectionState::Disconnected) {
            debug!("{}", err);
            return;
        }

        info!("Disconnected from GATT server (was {}).", from);
        self.relay.emit(EventKind::Disconnected, None);
    }

    fn is_current_device(&self, device: &DeviceId) -> bool {
        self.connection.as_ref().map_or(false, |connection| &connection.device == device)
    }

    fn schedule_auto_stop(&self, session: &ScanSession) {
        let cancel = session.timer_cancel.clone();
        let mut commands = self.commands.clone();
        let session_id = session.id;
        let period = session.duration;

        spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {},
                _ = sleep(period) => {
                    if let Err(err) = commands.send(ControllerCommand::ScanTimeout { session: session_id }).await {
                        debug!("Scan controller is gone, timeout of session {} dropped: {}", session_id, err);
                    }
                },
            }
        });
    }

    pub async fn run(
        mut self,
        cancel: CancellationToken,
        mut platform_events: Receiver<PlatformEvent>,
        mut commands: Receiver<ControllerCommand>,
    ) {
        'mainloop: loop {
            // commands first, so a scan requested before a callback arrived is already active
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                Some(command) = commands.next() => {
                    self.handle_command(command).await;
                },
                event = platform_events.next() => match event {
                    Some(event) => self.handle_platform_event(event).await,
                    None => {
                        info!("Platform event channel closed");
                        break 'mainloop;
                    },
                },
            }
        }

        if self.is_scanning() {
            self.stop_scan().await;
        }
    }
}

/// Sends commands to a controller running on its own task.
#[derive(Clone)]
pub struct ControllerHandle {
    sender: Sender<ControllerCommand>,
}

impl ControllerHandle {
    pub async fn start_scan(&mut self) -> Result<(), DeviceError> {
        self.sender.send(ControllerCommand::StartScan).await?;
        Ok(())
    }

    pub async fn stop_scan(&mut self) -> Result<(), DeviceError> {
        self.sender.send(ControllerCommand::StopScan).await?;
        Ok(())
    }

    pub async fn read_characteristic(&mut self, uuid: Uuid) -> Result<(), DeviceError> {
        self.sender.send(ControllerCommand::ReadCharacteristic(uuid)).await?;
        Ok(())
    }
}

pub fn spawn_controller(
    cancel: CancellationToken,
    platform: Arc<dyn BlePlatform>,
    platform_events: Receiver<PlatformEvent>,
    relay: EventRelay,
    options: ControllerOptions,
) -> (ControllerHandle, JoinHandle<()>) {
    let (sender, receiver) = channel::<ControllerCommand>(16);
    let controller = ScanController::new(platform, relay, options, sender.clone());

    let handle = spawn(controller.run(cancel, platform_events, receiver));

    (ControllerHandle { sender }, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::constants::make_player_name_uuid;
    use crate::device::mock::{MockPlatform, PlatformCall};
    use crate::device::types::{Event, ScanFailure};

    struct Fixture {
        controller: ScanController,
        platform: Arc<MockPlatform>,
        events: Receiver<Event>,
        commands: Receiver<ControllerCommand>,
    }

    fn fixture() -> Fixture {
        let platform = Arc::new(MockPlatform::new());
        let relay = EventRelay::new();
        let events = relay.subscribe(32);
        let (sender, commands) = channel::<ControllerCommand>(16);
        let controller = ScanController::new(platform.clone(), relay, ControllerOptions::default(), sender);

        Fixture { controller, platform, events, commands }
    }

    fn drain(events: &mut Receiver<Event>) -> Vec<Event> {
        let mut drained = Vec::new();
        while let Ok(Some(event)) = events.try_next() {
            drained.push(event);
        }
        drained
    }

    fn scan_result(id: &str) -> PlatformEvent {
        PlatformEvent::ScanResult(ScanResult {
            device: DeviceId::new(id),
            local_name: None,
            rssi: Some(-60),
        })
    }

    fn state_change(id: &str, state: ProfileState) -> PlatformEvent {
        PlatformEvent::ConnectionStateChanged {
            device: DeviceId::new(id),
            status: GattStatus::SUCCESS,
            state,
        }
    }

    async fn connected(fixture: &mut Fixture, id: &str) {
        fixture.controller.start_scan().await;
        fixture.controller.handle_platform_event(scan_result(id)).await;
        fixture.controller.handle_platform_event(state_change(id, ProfileState::Connected)).await;
    }

    #[tokio::test]
    async fn test_start_scan_is_unfiltered_low_latency() {
        let mut f = fixture();
        f.controller.start_scan().await;

        assert!(f.controller.is_scanning());
        let settings = match &f.platform.calls()[0] {
            PlatformCall::StartScan(settings) => settings.clone(),
            other => panic!("unexpected call {:?}", other),
        };
        assert_eq!(settings, ScanSettings::default());
        assert_eq!(settings.report_delay, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_only_first_scan_result_connects() {
        let mut f = fixture();
        f.controller.start_scan().await;

        for id in ["first", "second", "third", "first"] {
            f.controller.handle_platform_event(scan_result(id)).await;
        }
        f.controller.handle_platform_event(PlatformEvent::BatchScanResults(vec![])).await;

        assert_eq!(f.platform.connect_calls(), vec![DeviceId::new("first")]);
        assert!(f.platform.calls().contains(&PlatformCall::Connect {
            device: DeviceId::new("first"),
            auto_connect: true,
        }));
        assert_eq!(f.controller.connection_state(), ConnectionState::Connecting);
        assert!(f.controller.session().unwrap().is_claimed());
    }

    #[tokio::test]
    async fn test_scan_result_without_session_is_dropped() {
        let mut f = fixture();
        f.controller.handle_platform_event(scan_result("late")).await;

        f.controller.start_scan().await;
        f.controller.stop_scan().await;
        f.controller.handle_platform_event(scan_result("late")).await;

        assert!(f.platform.connect_calls().is_empty());
        assert!(f.controller.connection().is_none());
    }

    #[tokio::test]
    async fn test_each_session_connects_once() {
        let mut f = fixture();
        f.controller.start_scan().await;
        f.controller.handle_platform_event(scan_result("a")).await;
        f.controller.start_scan().await;
        f.controller.handle_platform_event(scan_result("b")).await;
        f.controller.handle_platform_event(scan_result("c")).await;

        assert_eq!(f.platform.connect_calls(), vec![DeviceId::new("a"), DeviceId::new("b")]);
        assert_eq!(f.controller.connection().unwrap().session, 2);
    }

    #[tokio::test]
    async fn test_connected_requests_service_discovery() {
        let mut f = fixture();
        connected(&mut f, "dev").await;

        assert_eq!(f.controller.connection_state(), ConnectionState::Connected);
        assert_eq!(f.platform.count(|call| call == &PlatformCall::DiscoverServices(DeviceId::new("dev"))), 1);

        let events = drain(&mut f.events);
        assert_eq!(events, vec![Event { kind: EventKind::Connected, payload: None }]);
    }

    #[tokio::test]
    async fn test_disconnect_releases_connection_without_reconnect() {
        let mut f = fixture();
        connected(&mut f, "dev").await;
        f.controller.handle_platform_event(state_change("dev", ProfileState::Disconnected)).await;

        assert!(f.controller.connection().is_none());
        assert_eq!(f.controller.connection_state(), ConnectionState::Disconnected);
        assert_eq!(f.platform.connect_calls().len(), 1);

        let kinds: Vec<EventKind> = drain(&mut f.events).into_iter().map(|event| event.kind).collect();
        assert_eq!(kinds, vec![EventKind::Connected, EventKind::Disconnected]);

        // a late callback for the released handle is ignored
        f.controller.handle_platform_event(state_change("dev", ProfileState::Connected)).await;
        assert!(drain(&mut f.events).is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_callback_releases_platform_link() {
        let mut f = fixture();
        connected(&mut f, "dev").await;
        assert!(f.platform.disconnect_calls().is_empty());

        f.controller.handle_platform_event(state_change("dev", ProfileState::Disconnected)).await;
        assert_eq!(f.platform.disconnect_calls(), vec![DeviceId::new("dev")]);
    }

    #[tokio::test]
    async fn test_new_session_replaces_previous_connection() {
        let mut f = fixture();
        connected(&mut f, "a").await;

        f.controller.start_scan().await;
        f.controller.handle_platform_event(scan_result("b")).await;
        f.controller.handle_platform_event(state_change("b", ProfileState::Connected)).await;

        assert_eq!(f.platform.disconnect_calls(), vec![DeviceId::new("a")]);
        assert_eq!(f.controller.connection().map(|connection| connection.device.clone()), Some(DeviceId::new("b")));
        let kinds: Vec<EventKind> = drain(&mut f.events).into_iter().map(|event| event.kind).collect();
        assert_eq!(kinds, vec![EventKind::Connected, EventKind::Disconnected, EventKind::Connected]);

        // callbacks still in flight for the released device change nothing
        f.controller.handle_platform_event(state_change("a", ProfileState::Disconnected)).await;
        f.controller.handle_platform_event(PlatformEvent::ServicesDiscovered {
            device: DeviceId::new("a"),
            status: GattStatus::SUCCESS,
        }).await;
        assert!(drain(&mut f.events).is_empty());
        assert_eq!(f.controller.connection_state(), ConnectionState::Connected);
        assert_eq!(f.platform.disconnect_calls(), vec![DeviceId::new("a")]);
    }

    #[tokio::test]
    async fn test_replacing_pending_attempt_cancels_it() {
        let mut f = fixture();
        f.controller.start_scan().await;
        f.controller.handle_platform_event(scan_result("a")).await;
        f.controller.start_scan().await;
        f.controller.handle_platform_event(scan_result("b")).await;

        assert_eq!(f.platform.disconnect_calls(), vec![DeviceId::new("a")]);
        assert_eq!(drain(&mut f.events), vec![Event { kind: EventKind::Disconnected, payload: None }]);
        assert_eq!(f.controller.connection_state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_failed_attempt_collapses_to_disconnected() {
        let mut f = fixture();
        f.controller.start_scan().await;
        f.controller.handle_platform_event(scan_result("dev")).await;
        f.controller.handle_platform_event(PlatformEvent::ConnectionStateChanged {
            device: DeviceId::new("dev"),
            status: GattStatus::FAILURE,
            state: ProfileState::Disconnected,
        }).await;

        assert!(f.controller.connection().is_none());
        let events = drain(&mut f.events);
        assert_eq!(events, vec![Event { kind: EventKind::Disconnected, payload: None }]);
        assert_eq!(f.platform.count(|call| matches!(call, PlatformCall::DiscoverServices(_))), 0);
    }

    #[tokio::test]
    async fn test_connect_call_error_collapses_to_disconnected() {
        let mut f = fixture();
        f.platform.fail_connect(true);
        f.controller.start_scan().await;
        f.controller.handle_platform_event(scan_result("dev")).await;

        assert!(f.controller.connection().is_none());
        let kinds: Vec<EventKind> = drain(&mut f.events).into_iter().map(|event| event.kind).collect();
        assert_eq!(kinds, vec![EventKind::Disconnected]);
    }

    #[tokio::test]
    async fn test_services_discovered() {
        let mut f = fixture();
        connected(&mut f, "dev").await;
        drain(&mut f.events);

        f.controller.handle_platform_event(PlatformEvent::ServicesDiscovered {
            device: DeviceId::new("dev"),
            status: GattStatus::FAILURE,
        }).await;
        assert!(drain(&mut f.events).is_empty());

        f.controller.handle_platform_event(PlatformEvent::ServicesDiscovered {
            device: DeviceId::new("dev"),
            status: GattStatus::SUCCESS,
        }).await;
        assert_eq!(drain(&mut f.events), vec![Event { kind: EventKind::ServicesDiscovered, payload: None }]);
    }

    #[tokio::test]
    async fn test_characteristic_read_payloads() {
        let mut f = fixture();
        connected(&mut f, "dev").await;
        drain(&mut f.events);

        f.controller.handle_platform_event(PlatformEvent::CharacteristicRead {
            device: DeviceId::new("dev"),
            uuid: make_player_name_uuid(),
            value: b"Ale".to_vec(),
            status: GattStatus::SUCCESS,
        }).await;
        f.controller.handle_platform_event(PlatformEvent::CharacteristicRead {
            device: DeviceId::new("dev"),
            uuid: Uuid::from_u128(0x2a19),
            value: vec![0x0A, 0xFF],
            status: GattStatus::SUCCESS,
        }).await;
        f.controller.handle_platform_event(PlatformEvent::CharacteristicRead {
            device: DeviceId::new("dev"),
            uuid: Uuid::from_u128(0x2a19),
            value: vec![0x01],
            status: GattStatus::FAILURE,
        }).await;

        let payloads: Vec<Option<String>> = drain(&mut f.events).into_iter().map(|event| event.payload).collect();
        assert_eq!(payloads, vec![Some("Ale".to_string()), Some("\n\u{FFFD}\n0A FF ".to_string())]);
    }

    #[tokio::test]
    async fn test_read_from_released_device_is_ignored() {
        let mut f = fixture();
        connected(&mut f, "a").await;
        f.controller.start_scan().await;
        f.controller.handle_platform_event(scan_result("b")).await;
        drain(&mut f.events);

        f.controller.handle_platform_event(PlatformEvent::CharacteristicRead {
            device: DeviceId::new("a"),
            uuid: make_player_name_uuid(),
            value: b"Ale".to_vec(),
            status: GattStatus::SUCCESS,
        }).await;
        assert!(drain(&mut f.events).is_empty());

        f.controller.handle_platform_event(state_change("b", ProfileState::Connected)).await;
        f.controller.handle_platform_event(PlatformEvent::CharacteristicRead {
            device: DeviceId::new("b"),
            uuid: make_player_name_uuid(),
            value: b"Bat".to_vec(),
            status: GattStatus::SUCCESS,
        }).await;
        let payloads: Vec<Option<String>> = drain(&mut f.events).into_iter().map(|event| event.payload).collect();
        assert_eq!(payloads, vec![None, Some("Bat".to_string())]);
    }

    #[tokio::test]
    async fn test_read_characteristic_requires_connection() {
        let mut f = fixture();
        assert!(matches!(
            f.controller.read_characteristic(make_player_name_uuid()).await,
            Err(DeviceError::NotConnected)
        ));

        connected(&mut f, "dev").await;
        f.controller.read_characteristic(make_player_name_uuid()).await.unwrap();
        assert!(f.platform.calls().contains(&PlatformCall::ReadCharacteristic {
            device: DeviceId::new("dev"),
            uuid: make_player_name_uuid(),
        }));
    }

    #[tokio::test]
    async fn test_start_scan_failure_is_only_logged() {
        let mut f = fixture();
        f.platform.fail_start_scan(true);
        f.controller.start_scan().await;
        f.controller.handle_platform_event(PlatformEvent::ScanFailed(ScanFailure::InternalError)).await;

        assert_eq!(f.platform.count(|call| matches!(call, PlatformCall::StartScan(_))), 1);
        assert!(drain(&mut f.events).is_empty());
    }

    #[tokio::test]
    async fn test_stop_scan_is_idempotent() {
        let mut f = fixture();
        f.controller.stop_scan().await;
        f.controller.start_scan().await;
        f.controller.stop_scan().await;
        f.controller.stop_scan().await;

        assert!(!f.controller.is_scanning());
        assert_eq!(f.platform.count(|call| call == &PlatformCall::StopScan), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_stops_after_period() {
        let mut f = fixture();
        let started = Instant::now();
        f.controller.start_scan().await;

        let command = f.commands.next().await.unwrap();
        assert_eq!(command, ControllerCommand::ScanTimeout { session: 1 });
        assert!(started.elapsed() >= Duration::from_millis(SCAN_PERIOD));

        f.controller.handle_command(command).await;
        assert!(!f.controller.is_scanning());
        assert_eq!(f.platform.calls().last(), Some(&PlatformCall::StopScan));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_leaves_a_single_timer() {
        let mut f = fixture();
        f.controller.start_scan().await;
        f.controller.stop_scan().await;
        f.controller.start_scan().await;
        f.controller.start_scan().await;

        let command = f.commands.next().await.unwrap();
        assert_eq!(command, ControllerCommand::ScanTimeout { session: 3 });

        let next = tokio::time::timeout(Duration::from_millis(SCAN_PERIOD * 3), f.commands.next()).await;
        assert!(next.is_err());
    }

    #[tokio::test]
    async fn test_stale_timeout_does_not_stop_newer_session() {
        let mut f = fixture();
        f.controller.start_scan().await;
        f.controller.start_scan().await;

        f.controller.handle_command(ControllerCommand::ScanTimeout { session: 1 }).await;
        assert_eq!(f.controller.session().map(|session| session.id), Some(2));
    }

    #[tokio::test]
    async fn test_run_loop_dispatches_until_cancelled() {
        let platform = Arc::new(MockPlatform::new());
        let relay = EventRelay::new();
        let mut events = relay.subscribe(8);
        let (mut platform_tx, platform_rx) = channel::<PlatformEvent>(8);
        let cancel = CancellationToken::new();

        let (mut handle, join) = spawn_controller(cancel.clone(), platform.clone(), platform_rx, relay, ControllerOptions::default());
        handle.start_scan().await.unwrap();
        platform_tx.send(scan_result("dev")).await.unwrap();
        platform_tx.send(state_change("dev", ProfileState::Connected)).await.unwrap();

        let event = events.next().await.unwrap();
        assert_eq!(event.kind, EventKind::Connected);

        cancel.cancel();
        join.await.unwrap();
        assert_eq!(platform.calls().last(), Some(&PlatformCall::StopScan));
    }

    #[tokio::test]
    async fn test_run_loop_ends_when_platform_events_close() {
        let platform = Arc::new(MockPlatform::new());
        let (platform_tx, platform_rx) = channel::<PlatformEvent>(8);
        let cancel = CancellationToken::new();

        let (mut handle, join) = spawn_controller(cancel.clone(), platform.clone(), platform_rx, EventRelay::new(), ControllerOptions::default());
        handle.start_scan().await.unwrap();
        drop(platform_tx);

        tokio::time::timeout(Duration::from_secs(5), join).await.unwrap().unwrap();
        assert!(!cancel.is_cancelled());
        assert_eq!(platform.calls().last(), Some(&PlatformCall::StopScan));
    }
}
