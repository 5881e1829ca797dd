//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv6Addr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::builder;
use crate::config::InterfaceConfig;
use crate::debug::Debug;
use crate::device::DeviceState;
use crate::error::{Error, IoError};
use crate::network::{RaSocket, SocketProvider};
use crate::packet::RouterSolicitation;
use crate::task::Task;

// Socket-open retry backoff bounds.
const RETRY_BACKOFF_MIN: Duration = Duration::from_secs(1);
const RETRY_BACKOFF_MAX: Duration = Duration::from_secs(30);

// Observable state of an interface worker.
//
// No packet is ever sent outside of `Running`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    #[default]
    Initializing,
    Running,
    Stopping,
    Stopped,
    Failing(String),
}

// Messages pushed from the supervisor to a worker.
#[derive(Debug)]
pub(crate) enum WorkerMsg {
    ConfigUpdate(InterfaceConfig),
}

// Worker input events, aggregated from all channels so they can be
// processed outside of the select.
enum WorkerEvent {
    Tick,
    CtlMsg(Option<WorkerMsg>),
    DeviceUpdate,
    Solicit(Result<(RouterSolicitation, Ipv6Addr), IoError>),
}

// Supervisor-side handle of a spawned worker.
#[derive(Debug)]
pub(crate) struct WorkerHandle {
    pub(crate) ctl_tx: mpsc::UnboundedSender<WorkerMsg>,
    pub(crate) state_rx: watch::Receiver<WorkerState>,
    pub(crate) cancel: CancellationToken,
    task: Task<()>,
}

// One worker per advertising interface: owns the socket, the unsolicited
// transmit timer and the solicitation responder.
struct Worker {
    name: String,
    config: InterfaceConfig,
    device: DeviceState,
    socket: Option<Arc<dyn RaSocket>>,
    provider: Arc<dyn SocketProvider>,
    dev_rx: watch::Receiver<DeviceState>,
    ctl_rx: mpsc::UnboundedReceiver<WorkerMsg>,
    state_tx: watch::Sender<WorkerState>,
    cancel: CancellationToken,
    last_failure: Option<String>,
}

// ===== impl WorkerState =====

impl WorkerState {
    pub fn failing_reason(&self) -> Option<&str> {
        match self {
            WorkerState::Failing(reason) => Some(reason),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerState::Initializing => write!(f, "initializing"),
            WorkerState::Running => write!(f, "running"),
            WorkerState::Stopping => write!(f, "stopping"),
            WorkerState::Stopped => write!(f, "stopped"),
            WorkerState::Failing(..) => write!(f, "failing"),
        }
    }
}

// ===== impl WorkerHandle =====

impl WorkerHandle {
    pub(crate) fn spawn(
        name: &str,
        config: InterfaceConfig,
        provider: Arc<dyn SocketProvider>,
        dev_rx: watch::Receiver<DeviceState>,
        cancel: CancellationToken,
    ) -> WorkerHandle {
        let (ctl_tx, ctl_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(WorkerState::Initializing);

        Debug::WorkerSpawn(name).log();
        let worker = Worker {
            name: name.to_owned(),
            config,
            device: DeviceState::default(),
            socket: None,
            provider,
            dev_rx,
            ctl_rx,
            state_tx,
            cancel: cancel.clone(),
            last_failure: None,
        };
        let task = Task::spawn(worker.run());

        WorkerHandle {
            ctl_tx,
            state_rx,
            cancel,
            task,
        }
    }

    // Lets the worker task outlive this handle, so an in-flight stop can
    // still close the socket after a reload deadline fires.
    pub(crate) fn detach(&mut self) {
        self.task.detach();
    }

    // Waits until the worker reaches `Stopped`, up to the given deadline.
    pub(crate) async fn await_stopped(
        &self,
        deadline: Instant,
    ) -> Result<(), Error> {
        let mut state_rx = self.state_rx.clone();
        let stopped =
            state_rx.wait_for(|state| *state == WorkerState::Stopped);
        let result = match time::timeout_at(deadline, stopped).await {
            Ok(_) => Ok(()),
            Err(_) => Err(Error::ReloadDeadlineExceeded),
        };
        result
    }
}

// ===== impl Worker =====

impl Worker {
    async fn run(mut self) {
        let mut backoff = RETRY_BACKOFF_MIN;

        'lifecycle: loop {
            // Wait for the device to come up.
            self.set_state(WorkerState::Initializing);
            self.refresh_device();
            while !self.device.is_up {
                tokio::select! {
                    _ = self.cancel.cancelled() => break 'lifecycle,
                    result = self.dev_rx.changed() => {
                        if result.is_err() {
                            break 'lifecycle;
                        }
                    }
                    msg = self.ctl_rx.recv() => match msg {
                        Some(WorkerMsg::ConfigUpdate(config)) => {
                            self.config = config;
                        }
                        None => break 'lifecycle,
                    },
                }
                self.refresh_device();
            }

            // Open the socket, retrying with backoff while the kernel
            // refuses it. The socket survives device-down transitions, so
            // a reopen is only needed after a failure.
            if self.socket.is_none() {
                match self.provider.open(&self.name).await {
                    Ok(socket) => {
                        self.socket = Some(socket);
                        self.last_failure = None;
                        backoff = RETRY_BACKOFF_MIN;
                    }
                    Err(error) => {
                        let reason = crate::error::with_source(&error);
                        if self.last_failure.as_deref() != Some(&reason) {
                            Error::WorkerStartError(self.name.clone(), error)
                                .log();
                            self.last_failure = Some(reason.clone());
                        }
                        self.set_state(WorkerState::Failing(reason));
                        tokio::select! {
                            _ = self.cancel.cancelled() => break 'lifecycle,
                            _ = time::sleep(backoff) => (),
                        }
                        backoff = (backoff * 2).min(RETRY_BACKOFF_MAX);
                        continue 'lifecycle;
                    }
                }
            }
            let Some(socket) = self.socket.clone() else {
                continue 'lifecycle;
            };

            // The first advertisement is sent right away; the periodic
            // timer covers the steady state.
            self.set_state(WorkerState::Running);
            self.send_unsolicited(&socket).await;
            let mut period =
                Duration::from_millis(self.config.ra_interval_milliseconds);
            let mut ticker = new_ticker(period);

            loop {
                let event = tokio::select! {
                    _ = self.cancel.cancelled() => break 'lifecycle,
                    _ = ticker.tick() => WorkerEvent::Tick,
                    msg = self.ctl_rx.recv() => WorkerEvent::CtlMsg(msg),
                    result = self.dev_rx.changed() => {
                        if result.is_err() {
                            break 'lifecycle;
                        }
                        WorkerEvent::DeviceUpdate
                    }
                    result = socket.recv_rs() => WorkerEvent::Solicit(result),
                };

                match event {
                    WorkerEvent::Tick => {
                        self.send_unsolicited(&socket).await;
                    }
                    WorkerEvent::CtlMsg(Some(WorkerMsg::ConfigUpdate(
                        config,
                    ))) => {
                        let new_period = Duration::from_millis(
                            config.ra_interval_milliseconds,
                        );
                        self.config = config;
                        if new_period != period {
                            // Next tick at now + the new interval.
                            period = new_period;
                            ticker = new_ticker(period);
                        }
                    }
                    WorkerEvent::CtlMsg(None) => break 'lifecycle,
                    WorkerEvent::DeviceUpdate => {
                        self.refresh_device();
                        if !self.device.is_up {
                            // Back to Initializing; the timer is dropped
                            // and the socket is kept.
                            continue 'lifecycle;
                        }
                    }
                    WorkerEvent::Solicit(Ok((_rs, src))) => {
                        Debug::SolicitRx(&self.name, &src).log();
                        self.send_solicited(&socket, src).await;
                    }
                    WorkerEvent::Solicit(Err(IoError::SocketClosed)) => {
                        break 'lifecycle;
                    }
                    WorkerEvent::Solicit(Err(error)) => {
                        // Transient; stay in Running.
                        error.log();
                    }
                }
            }
        }

        self.set_state(WorkerState::Stopping);
        if let Some(socket) = self.socket.take() {
            socket.close();
        }
        self.set_state(WorkerState::Stopped);
    }

    // Reads the latest device state off the watch channel, coalescing any
    // burst of updates into the value the next advertisement will use.
    fn refresh_device(&mut self) {
        let device = self.dev_rx.borrow_and_update().clone();
        if device != self.device {
            Debug::DeviceUpdate(&self.name, &device).log();
            self.device = device;
        }
    }

    async fn send_unsolicited(&self, socket: &Arc<dyn RaSocket>) {
        let msg = builder::build_advert(&self.config, &self.device);
        Debug::AdvertTx(&self.name, None, &msg).log();
        if let Err(error) = socket.send_multicast(&msg).await {
            error.log();
        }
    }

    // Solicited advertisements go back to the soliciting address; an
    // unspecified source gets the multicast reply instead (RFC 4861,
    // Section 6.2.6).
    async fn send_solicited(
        &self,
        socket: &Arc<dyn RaSocket>,
        src: Ipv6Addr,
    ) {
        let msg = builder::build_advert(&self.config, &self.device);
        let result = if src.is_unspecified() {
            Debug::AdvertTx(&self.name, None, &msg).log();
            socket.send_multicast(&msg).await
        } else {
            Debug::AdvertTx(&self.name, Some(&src), &msg).log();
            socket.send_unicast(&msg, src).await
        };
        if let Err(error) = result {
            error.log();
        }
    }

    fn set_state(&self, new_state: WorkerState) {
        let old_state = self.state_tx.send_replace(new_state.clone());
        if old_state != new_state {
            Debug::WorkerStateChange(&self.name, &old_state, &new_state)
                .log();
        }
    }
}

// ===== helper functions =====

fn new_ticker(period: Duration) -> time::Interval {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
