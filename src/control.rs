//! The rover's behavioral state machine and the control loop that drives it.
//!
//! The loop owns the [`Session`] plus the host-side collaborator objects
//! (drivetrain mirror, remote input) and runs a simple patrol: dwell in
//! `Stopped`, drive forward for the same dwell, repeat. Inbound messages
//! from the firmware feed back into the state: NACKs trigger bounded
//! resends, range reports update the last known distance and steer the
//! rover away from obstacles while it is in autonomous mode.

use std::time::Duration;

use log::{debug, error, info, trace, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;

use crate::{
    connection::{Inbound, Session},
    devices::{Drivetrain, RemoteCommand, RemoteControl},
    message::{cmds, is_nack, modules},
};

#[cfg(feature = "serial")]
use crate::connection::SessionConfig;
#[cfg(feature = "serial")]
use std::future::Future;
#[cfg(feature = "serial")]
use tokio_serial::SerialStream;

/// The rover's behavioral state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoverState {
    /// Motors stopped, waiting out the dwell interval.
    Stopped,
    /// Driving forward until the dwell interval elapses.
    Running,
    /// Driving continuously, steering away from obstacles. The patrol cycle
    /// is suspended until the operator toggles back out.
    Autonomous,
}

/// Tunables for the control loop.
#[derive(Debug, Clone)]
pub struct RoverConfig {
    /// Time the rover stays in each leg of the patrol cycle.
    pub dwell: Duration,
    /// How often the distance-sensor stream is re-armed.
    pub sensor_poll_interval: Duration,
    /// Range reports below this many centimeters count as an obstacle.
    pub proximity_threshold: u32,
    /// Speed for the patrol's forward leg.
    pub forward_speed: u8,
    /// Fixed delay between reconnect attempts.
    pub retry_delay: Duration,
    /// How many times a rejected forward command is re-sent before giving
    /// up.
    pub max_forward_retries: u32,
    /// Control loop cadence.
    pub tick: Duration,
}

impl Default for RoverConfig {
    fn default() -> Self {
        Self {
            dwell: Duration::from_secs(5),
            sensor_poll_interval: Duration::from_secs(1),
            proximity_threshold: 30,
            forward_speed: 255,
            retry_delay: Duration::from_secs(5),
            max_forward_retries: 3,
            tick: Duration::from_millis(50),
        }
    }
}

/// The rover control loop.
pub struct Rover<T, R> {
    session: Session<T>,
    drivetrain: Drivetrain,
    remote: R,
    config: RoverConfig,
    state: RoverState,
    last_transition: Instant,
    last_sensor_poll: Instant,
    last_distance: Option<u32>,
    forward_retries: u32,
    avoiding: bool,
}

impl<T, R> Rover<T, R>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
    R: RemoteControl,
{
    pub fn new(session: Session<T>, drivetrain: Drivetrain, remote: R, config: RoverConfig) -> Self {
        let now = Instant::now();
        Self {
            session,
            drivetrain,
            remote,
            config,
            state: RoverState::Stopped,
            last_transition: now,
            last_sensor_poll: now,
            last_distance: None,
            forward_retries: 0,
            avoiding: false,
        }
    }

    pub fn state(&self) -> RoverState {
        self.state
    }

    /// The most recent distance report, in centimeters.
    pub fn last_distance(&self) -> Option<u32> {
        self.last_distance
    }

    pub fn drivetrain(&self) -> &Drivetrain {
        &self.drivetrain
    }

    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    /// One control-loop iteration: operator input, sensor re-arm, dwell
    /// transition, then a full drain of the inbound queue.
    pub async fn step(&mut self) {
        // Operator input first so a manual stop beats the patrol logic
        while let Some(command) = self.remote.poll_command() {
            self.apply_remote(command).await;
        }

        if !self.session.is_connected() {
            return;
        }

        let now = Instant::now();

        if now.duration_since(self.last_sensor_poll) >= self.config.sensor_poll_interval {
            self.last_sensor_poll = now;
            trace!("Re-arming the distance sensor stream");
            self.try_send(modules::DISTANCE_SENSOR, cmds::DISTANCE_START, 0)
                .await;
        }

        self.evaluate_dwell(now).await;

        while let Some(item) = self.session.try_recv() {
            self.dispatch(item).await;
        }
    }

    async fn evaluate_dwell(&mut self, now: Instant) {
        if self.state == RoverState::Autonomous {
            return;
        }
        if now.duration_since(self.last_transition) < self.config.dwell {
            return;
        }

        match self.state {
            RoverState::Stopped => {
                info!("Dwell elapsed, driving forward");
                self.enter_running(now).await;
            }
            RoverState::Running => {
                info!("Dwell elapsed, stopping");
                self.enter_stopped(now).await;
            }
            RoverState::Autonomous => {}
        }
    }

    async fn enter_running(&mut self, now: Instant) {
        self.state = RoverState::Running;
        self.last_transition = now;
        self.forward_retries = 0;
        self.drivetrain.forward(self.config.forward_speed);
        self.try_send(
            modules::MOTOR,
            cmds::MOTOR_FORWARD,
            self.config.forward_speed as u32,
        )
        .await;
    }

    async fn enter_stopped(&mut self, now: Instant) {
        self.state = RoverState::Stopped;
        self.last_transition = now;
        self.drivetrain.stop();
        self.try_send(modules::MOTOR, cmds::MOTOR_STOP, 0).await;
    }

    /// Handles one inbound item, keyed on `(module, command_type)`.
    async fn dispatch(&mut self, item: Inbound) {
        let message = match item {
            Inbound::Message(message) => message,
            Inbound::Invalid => {
                warn!("Dropping invalid inbound frame");
                return;
            }
        };

        trace!("Dispatching {message:?}");

        match (message.module, message.command_type) {
            (modules::MOTOR, cmds::MOTOR_FORWARD_NACK) => self.retry_forward().await,
            (modules::MOTOR, cmd) if is_nack(cmd) => {
                warn!("Motor command {cmd:#04x} rejected by the firmware");
            }
            (modules::DISTANCE_SENSOR, cmds::DISTANCE_DATA) => {
                self.handle_distance(message.data).await;
            }
            (modules::DISTANCE_SENSOR, cmd) if is_nack(cmd) => {
                warn!("Distance sensor command {cmd:#04x} rejected by the firmware");
            }
            (modules::ARDUINO, cmd) if is_nack(cmd) => {
                warn!("Supervisor command {cmd:#04x} rejected by the firmware");
            }
            (module, cmd) => {
                debug!("Ignoring message for module {module:#04x} command {cmd:#04x}");
            }
        }
    }

    /// Re-sends a rejected forward command, up to the configured bound.
    async fn retry_forward(&mut self) {
        if self.forward_retries >= self.config.max_forward_retries {
            error!(
                "Forward command still rejected after {} retries, giving up",
                self.forward_retries
            );
            return;
        }
        self.forward_retries += 1;
        warn!(
            "Forward command rejected, retrying ({}/{})",
            self.forward_retries, self.config.max_forward_retries
        );
        self.try_send(
            modules::MOTOR,
            cmds::MOTOR_FORWARD,
            self.config.forward_speed as u32,
        )
        .await;
    }

    async fn handle_distance(&mut self, distance: u32) {
        trace!("Range report: {distance} cm");
        self.last_distance = Some(distance);

        if self.state != RoverState::Autonomous {
            if distance < self.config.proximity_threshold {
                debug!("Obstacle at {distance} cm");
            }
            return;
        }

        if distance < self.config.proximity_threshold {
            if !self.avoiding {
                info!("Obstacle at {distance} cm, turning away");
                self.avoiding = true;
                self.drivetrain.left(self.config.forward_speed);
                self.try_send(
                    modules::MOTOR,
                    cmds::MOTOR_LEFT,
                    self.config.forward_speed as u32,
                )
                .await;
            }
        } else if self.avoiding {
            info!("Path clear at {distance} cm, resuming");
            self.avoiding = false;
            self.drivetrain.forward(self.config.forward_speed);
            self.try_send(
                modules::MOTOR,
                cmds::MOTOR_FORWARD,
                self.config.forward_speed as u32,
            )
            .await;
        }
    }

    async fn apply_remote(&mut self, command: RemoteCommand) {
        debug!("Remote command: {command:?}");
        match command {
            RemoteCommand::Forward(speed) => {
                self.drivetrain.forward(speed);
                self.try_send(modules::MOTOR, cmds::MOTOR_FORWARD, speed as u32)
                    .await;
            }
            RemoteCommand::Back(speed) => {
                self.drivetrain.back(speed);
                self.try_send(modules::MOTOR, cmds::MOTOR_BACK, speed as u32)
                    .await;
            }
            RemoteCommand::Left(speed) => {
                self.drivetrain.left(speed);
                self.try_send(modules::MOTOR, cmds::MOTOR_LEFT, speed as u32)
                    .await;
            }
            RemoteCommand::Right(speed) => {
                self.drivetrain.right(speed);
                self.try_send(modules::MOTOR, cmds::MOTOR_RIGHT, speed as u32)
                    .await;
            }
            RemoteCommand::Stop => {
                self.enter_stopped(Instant::now()).await;
            }
            RemoteCommand::Function(1) => self.toggle_autonomous().await,
            RemoteCommand::Function(key) => debug!("Function key {key} is unassigned"),
        }
    }

    async fn toggle_autonomous(&mut self) {
        if self.state == RoverState::Autonomous {
            info!("Leaving autonomous mode");
            self.avoiding = false;
            self.enter_stopped(Instant::now()).await;
        } else {
            info!("Entering autonomous mode");
            self.state = RoverState::Autonomous;
            self.avoiding = false;
            self.forward_retries = 0;
            self.drivetrain.forward(self.config.forward_speed);
            self.try_send(
                modules::MOTOR,
                cmds::MOTOR_FORWARD,
                self.config.forward_speed as u32,
            )
            .await;
        }
    }

    /// Sends and logs instead of failing; a lost link is noticed by the next
    /// loop iteration, not by whichever send happened to hit it first.
    async fn try_send(&mut self, module: u8, command_type: u8, data: u32) {
        if let Err(e) = self.session.send_command(module, command_type, data).await {
            warn!("Send failed: {e}");
        }
    }

    /// Stops the rover and tells the supervisor we are going away.
    pub async fn shutdown(&mut self) {
        info!("Shutting down, stopping the rover");
        self.drivetrain.stop();
        if self.session.is_connected() {
            self.try_send(modules::MOTOR, cmds::MOTOR_STOP, 0).await;
            self.try_send(modules::ARDUINO, cmds::ARDUINO_STOP, 0).await;
        }
        info!("Goodbye");
    }
}

#[cfg(feature = "serial")]
impl<R: RemoteControl> Rover<SerialStream, R> {
    /// Drives the control loop until `shutdown` resolves, reopening the
    /// serial session on a fixed backoff whenever the link drops.
    pub async fn run(&mut self, serial_config: &SessionConfig, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);

        let mut tick = tokio::time::interval(self.config.tick);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut next_retry = Instant::now();

        if self.session.is_connected() {
            self.on_connect().await;
        }

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tick.tick() => {
                    if !self.session.is_connected() {
                        let now = Instant::now();
                        if now >= next_retry {
                            next_retry = now + self.config.retry_delay;
                            match Session::open(serial_config).await {
                                Ok(session) => {
                                    info!("Reconnected to the rover");
                                    self.session = session;
                                    self.on_connect().await;
                                }
                                Err(e) => warn!(
                                    "Could not reach the rover ({e}), retrying in {:?}",
                                    self.config.retry_delay
                                ),
                            }
                        }
                    }
                    self.step().await;
                }
            }
        }

        self.shutdown().await;
    }

    /// Wakes the supervisor and arms the range stream on a fresh link.
    async fn on_connect(&mut self) {
        let now = Instant::now();
        self.state = RoverState::Stopped;
        self.last_transition = now;
        self.last_sensor_poll = now;
        self.forward_retries = 0;
        self.avoiding = false;
        self.drivetrain.stop();

        self.try_send(modules::ARDUINO, cmds::ARDUINO_START, 0).await;
        self.try_send(modules::DISTANCE_SENSOR, cmds::DISTANCE_START, 0)
            .await;
    }
}
