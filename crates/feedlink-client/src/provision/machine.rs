//! Provisioning state machine.
//!
//! `Idle -> Scanning -> Found -> Connecting -> Connected -> Provisioning ->
//! Provisioned | Failed`. Each transition is one externally observable
//! operation with a single success and a single failure outcome. Every
//! transport operation is bounded by the configured timeout so a dead
//! appliance surfaces an error instead of hanging the flow.

use std::collections::HashSet;

use tokio::sync::mpsc;
use tracing::{info, warn};

use feedlink_core::{DeviceId, ProvisionConfig};

use super::transport::{Candidate, ProvisionError, ProvisioningTransport};

/// Externally observable provisioning phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionState {
    Idle,
    Scanning,
    Found,
    Connecting,
    Connected,
    Provisioning,
    Provisioned,
    Failed,
}

/// Sequential provisioning flow over a [`ProvisioningTransport`].
///
/// Owns at most one secure session. `&mut self` on every operation makes a
/// second concurrent session unrepresentable on a single instance.
pub struct Provisioner<T: ProvisioningTransport> {
    transport: T,
    config: ProvisionConfig,
    state: ProvisionState,
    scan_rx: Option<mpsc::Receiver<Candidate>>,
    seen: HashSet<String>,
    session: Option<T::Session>,
    candidate: Option<Candidate>,
    identity: Option<DeviceId>,
}

impl<T: ProvisioningTransport> Provisioner<T> {
    pub fn new(transport: T, config: ProvisionConfig) -> Self {
        Self {
            transport,
            config,
            state: ProvisionState::Idle,
            scan_rx: None,
            seen: HashSet::new(),
            session: None,
            candidate: None,
            identity: None,
        }
    }

    pub const fn state(&self) -> ProvisionState {
        self.state
    }

    /// Identity yielded by a completed provisioning run, if any.
    pub const fn identity(&self) -> Option<&DeviceId> {
        self.identity.as_ref()
    }

    /// Begin (or restart) candidate discovery.
    pub async fn start_scan(&mut self) -> Result<(), ProvisionError> {
        if self.session.is_some() {
            return Err(ProvisionError::SessionActive);
        }
        self.seen.clear();
        self.scan_rx = Some(self.transport.start_scan(&self.config.scan_prefix).await?);
        self.state = ProvisionState::Scanning;
        Ok(())
    }

    /// Next undiscovered candidate, or `None` when the scan ends.
    ///
    /// Duplicate advertisements for a handle already seen in this scan are
    /// suppressed.
    pub async fn next_candidate(&mut self) -> Option<Candidate> {
        loop {
            let candidate = self.scan_rx.as_mut()?.recv().await?;
            if self.seen.insert(candidate.handle.clone()) {
                self.state = ProvisionState::Found;
                return Some(candidate);
            }
        }
    }

    /// Stop scanning explicitly.
    pub async fn stop_scan(&mut self) {
        if self.scan_rx.take().is_some() {
            self.transport.stop_scan().await;
        }
        if matches!(self.state, ProvisionState::Scanning | ProvisionState::Found) {
            self.state = ProvisionState::Idle;
        }
    }

    /// Establish the secured session with a chosen candidate.
    ///
    /// On failure or timeout the machine returns to `Scanning` (discovery is
    /// restarted) so the user can pick again.
    pub async fn connect(&mut self, candidate: &Candidate) -> Result<(), ProvisionError> {
        if self.session.is_some() {
            return Err(ProvisionError::SessionActive);
        }
        if !matches!(self.state, ProvisionState::Scanning | ProvisionState::Found) {
            return Err(ProvisionError::InvalidState("not scanning"));
        }

        // Selection terminates discovery.
        if self.scan_rx.take().is_some() {
            self.transport.stop_scan().await;
        }
        self.state = ProvisionState::Connecting;

        let attempt =
            tokio::time::timeout(self.config.op_timeout, self.transport.connect(candidate)).await;

        match attempt {
            Ok(Ok(session)) => {
                self.session = Some(session);
                self.candidate = Some(candidate.clone());
                self.state = ProvisionState::Connected;
                info!(name = %candidate.name, "Secure session established");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(name = %candidate.name, error = %e, "Secure session failed");
                self.resume_scanning().await;
                Err(e)
            }
            Err(_) => {
                warn!(name = %candidate.name, "Secure session attempt timed out");
                self.resume_scanning().await;
                Err(ProvisionError::ConnectionTimeout)
            }
        }
    }

    /// Transfer WiFi credentials and derive the appliance's durable
    /// identity from the session's advertised name.
    ///
    /// No partial identity is produced on failure; the machine lands in
    /// `Failed` and the caller retries from `start_scan` after
    /// [`Self::disconnect`].
    pub async fn provision(
        &mut self,
        ssid: &str,
        password: &str,
    ) -> Result<DeviceId, ProvisionError> {
        if self.state != ProvisionState::Connected {
            return Err(ProvisionError::NoSession);
        }
        let Some(mut session) = self.session.take() else {
            return Err(ProvisionError::NoSession);
        };
        self.state = ProvisionState::Provisioning;

        let attempt = tokio::time::timeout(
            self.config.op_timeout,
            self.transport.provision(&mut session, ssid, password),
        )
        .await;
        self.session = Some(session);

        match attempt {
            Ok(Ok(())) => {
                // Candidate is always present once Connected.
                let name = self.candidate.as_ref().map_or("", |c| c.name.as_str());
                let identity = DeviceId::from_advertised_name(name);
                self.identity = Some(identity.clone());
                self.state = ProvisionState::Provisioned;
                info!(device_id = %identity, "Appliance provisioned");
                Ok(identity)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Credential transfer rejected");
                self.state = ProvisionState::Failed;
                Err(e)
            }
            Err(_) => {
                warn!("Credential transfer timed out");
                self.state = ProvisionState::Failed;
                Err(ProvisionError::ProvisioningTimeout)
            }
        }
    }

    /// Release the secure session. Idempotent; safe after failure or
    /// success.
    pub async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            let released =
                tokio::time::timeout(self.config.op_timeout, self.transport.disconnect(session))
                    .await;
            if released.is_err() {
                warn!("Session release timed out");
            }
        }
        self.candidate = None;
        if !matches!(self.state, ProvisionState::Provisioned | ProvisionState::Failed) {
            self.state = ProvisionState::Idle;
        }
    }

    async fn resume_scanning(&mut self) {
        // A fresh scan re-offers every candidate, including the one that
        // just failed.
        self.seen.clear();
        match self.transport.start_scan(&self.config.scan_prefix).await {
            Ok(rx) => {
                self.scan_rx = Some(rx);
                self.state = ProvisionState::Scanning;
            }
            Err(e) => {
                warn!(error = %e, "Could not restart discovery after failure");
                self.state = ProvisionState::Failed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;

    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    enum Behavior {
        #[default]
        Succeed,
        Fail,
        Hang,
    }

    #[derive(Default)]
    struct Counters {
        scans_started: usize,
        scans_stopped: usize,
        disconnects: usize,
        provision_calls: usize,
    }

    /// Scripted transport: emits a fixed candidate list per scan and follows
    /// the configured behavior for connect/provision.
    struct MockTransport {
        advertised: Vec<Candidate>,
        on_connect: Behavior,
        on_provision: Behavior,
        counters: Arc<Mutex<Counters>>,
    }

    struct MockSession;

    impl MockTransport {
        fn new(advertised: Vec<Candidate>) -> (Self, Arc<Mutex<Counters>>) {
            let counters = Arc::new(Mutex::new(Counters::default()));
            (
                Self {
                    advertised,
                    on_connect: Behavior::Succeed,
                    on_provision: Behavior::Succeed,
                    counters: Arc::clone(&counters),
                },
                counters,
            )
        }
    }

    #[async_trait]
    impl ProvisioningTransport for MockTransport {
        type Session = MockSession;

        async fn start_scan(
            &mut self,
            prefix: &str,
        ) -> Result<mpsc::Receiver<Candidate>, ProvisionError> {
            self.counters.lock().unwrap().scans_started += 1;
            let (tx, rx) = mpsc::channel(16);
            for candidate in &self.advertised {
                if candidate.name.starts_with(prefix) {
                    tx.send(candidate.clone()).await.ok();
                }
            }
            Ok(rx)
        }

        async fn stop_scan(&mut self) {
            self.counters.lock().unwrap().scans_stopped += 1;
        }

        async fn connect(
            &mut self,
            _candidate: &Candidate,
        ) -> Result<Self::Session, ProvisionError> {
            match self.on_connect {
                Behavior::Succeed => Ok(MockSession),
                Behavior::Fail => Err(ProvisionError::Connection("rejected".into())),
                Behavior::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }

        async fn provision(
            &mut self,
            _session: &mut Self::Session,
            _ssid: &str,
            _password: &str,
        ) -> Result<(), ProvisionError> {
            self.counters.lock().unwrap().provision_calls += 1;
            match self.on_provision {
                Behavior::Succeed => Ok(()),
                Behavior::Fail => Err(ProvisionError::Provisioning("appliance busy".into())),
                Behavior::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }

        async fn disconnect(&mut self, _session: Self::Session) {
            self.counters.lock().unwrap().disconnects += 1;
        }
    }

    fn candidate(name: &str, handle: &str) -> Candidate {
        Candidate { name: name.to_owned(), handle: handle.to_owned() }
    }

    fn config() -> ProvisionConfig {
        ProvisionConfig {
            op_timeout: Duration::from_secs(30),
            ..ProvisionConfig::default()
        }
    }

    #[tokio::test]
    async fn happy_path_yields_stripped_identity() {
        let (transport, counters) = MockTransport::new(vec![candidate(
            "PROV_PETFEEDER_A1B2C3",
            "h1",
        )]);
        let mut prov = Provisioner::new(transport, config());

        prov.start_scan().await.unwrap();
        assert_eq!(prov.state(), ProvisionState::Scanning);

        let found = prov.next_candidate().await.unwrap();
        assert_eq!(prov.state(), ProvisionState::Found);

        prov.connect(&found).await.unwrap();
        assert_eq!(prov.state(), ProvisionState::Connected);

        let identity = prov.provision("HomeWifi", "hunter2").await.unwrap();
        assert_eq!(identity.as_str(), "PETFEEDER_A1B2C3");
        assert_eq!(prov.state(), ProvisionState::Provisioned);
        assert_eq!(prov.identity(), Some(&identity));

        prov.disconnect().await;
        prov.disconnect().await; // idempotent
        assert_eq!(counters.lock().unwrap().disconnects, 1);
    }

    #[tokio::test]
    async fn duplicate_advertisements_are_suppressed() {
        let (transport, _) = MockTransport::new(vec![
            candidate("PROV_PETFEEDER_A", "h1"),
            candidate("PROV_PETFEEDER_A", "h1"),
            candidate("PROV_PETFEEDER_B", "h2"),
        ]);
        let mut prov = Provisioner::new(transport, config());
        prov.start_scan().await.unwrap();

        assert_eq!(prov.next_candidate().await.unwrap().handle, "h1");
        assert_eq!(prov.next_candidate().await.unwrap().handle, "h2");
        assert!(prov.next_candidate().await.is_none());
    }

    #[tokio::test]
    async fn scan_filters_by_prefix() {
        let (transport, _) = MockTransport::new(vec![
            candidate("SOMETHING_ELSE", "h1"),
            candidate("PROV_PETFEEDER_A", "h2"),
        ]);
        let mut prov = Provisioner::new(transport, config());
        prov.start_scan().await.unwrap();

        assert_eq!(prov.next_candidate().await.unwrap().handle, "h2");
        assert!(prov.next_candidate().await.is_none());
    }

    #[tokio::test]
    async fn connect_failure_returns_to_scanning() {
        let (mut transport, counters) =
            MockTransport::new(vec![candidate("PROV_PETFEEDER_A", "h1")]);
        transport.on_connect = Behavior::Fail;
        let mut prov = Provisioner::new(transport, config());

        prov.start_scan().await.unwrap();
        let found = prov.next_candidate().await.unwrap();

        let err = prov.connect(&found).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Connection(_)));
        assert_eq!(prov.state(), ProvisionState::Scanning);

        // Discovery restarted; the same candidate is offered again.
        assert_eq!(counters.lock().unwrap().scans_started, 2);
        assert!(prov.next_candidate().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timeout_surfaces_instead_of_hanging() {
        let (mut transport, _) = MockTransport::new(vec![candidate("PROV_PETFEEDER_A", "h1")]);
        transport.on_connect = Behavior::Hang;
        let mut prov = Provisioner::new(transport, config());

        prov.start_scan().await.unwrap();
        let found = prov.next_candidate().await.unwrap();

        let err = prov.connect(&found).await.unwrap_err();
        assert!(matches!(err, ProvisionError::ConnectionTimeout));
        assert_eq!(prov.state(), ProvisionState::Scanning);
    }

    #[tokio::test]
    async fn provision_failure_lands_in_failed_with_no_identity() {
        let (mut transport, _) = MockTransport::new(vec![candidate("PROV_PETFEEDER_A", "h1")]);
        transport.on_provision = Behavior::Fail;
        let mut prov = Provisioner::new(transport, config());

        prov.start_scan().await.unwrap();
        let found = prov.next_candidate().await.unwrap();
        prov.connect(&found).await.unwrap();

        let err = prov.provision("ssid", "pw").await.unwrap_err();
        assert!(matches!(err, ProvisionError::Provisioning(_)));
        assert_eq!(prov.state(), ProvisionState::Failed);
        assert!(prov.identity().is_none());

        // Retry-capable: release the session and scan again.
        prov.disconnect().await;
        prov.start_scan().await.unwrap();
        assert_eq!(prov.state(), ProvisionState::Scanning);
    }

    #[tokio::test(start_paused = true)]
    async fn provision_timeout_surfaces_instead_of_hanging() {
        let (mut transport, _) = MockTransport::new(vec![candidate("PROV_PETFEEDER_A", "h1")]);
        transport.on_provision = Behavior::Hang;
        let mut prov = Provisioner::new(transport, config());

        prov.start_scan().await.unwrap();
        let found = prov.next_candidate().await.unwrap();
        prov.connect(&found).await.unwrap();

        let err = prov.provision("ssid", "pw").await.unwrap_err();
        assert!(matches!(err, ProvisionError::ProvisioningTimeout));
        assert_eq!(prov.state(), ProvisionState::Failed);
    }

    #[tokio::test]
    async fn provision_without_session_is_rejected() {
        let (transport, _) = MockTransport::new(vec![]);
        let mut prov = Provisioner::new(transport, config());

        let err = prov.provision("ssid", "pw").await.unwrap_err();
        assert!(matches!(err, ProvisionError::NoSession));
    }

    #[tokio::test]
    async fn scanning_with_open_session_is_rejected() {
        let (transport, _) = MockTransport::new(vec![candidate("PROV_PETFEEDER_A", "h1")]);
        let mut prov = Provisioner::new(transport, config());

        prov.start_scan().await.unwrap();
        let found = prov.next_candidate().await.unwrap();
        prov.connect(&found).await.unwrap();

        assert!(matches!(
            prov.start_scan().await.unwrap_err(),
            ProvisionError::SessionActive
        ));
        assert!(matches!(
            prov.connect(&found).await.unwrap_err(),
            ProvisionError::SessionActive
        ));
    }

    #[tokio::test]
    async fn selection_stops_discovery() {
        let (transport, counters) = MockTransport::new(vec![candidate("PROV_PETFEEDER_A", "h1")]);
        let mut prov = Provisioner::new(transport, config());

        prov.start_scan().await.unwrap();
        let found = prov.next_candidate().await.unwrap();
        prov.connect(&found).await.unwrap();

        assert_eq!(counters.lock().unwrap().scans_stopped, 1);
    }
}
