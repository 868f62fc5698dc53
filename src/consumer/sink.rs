//! sink.rs
//! Actuation sink: the opaque downstream that receives three scalars per fresh
//! command and is advanced by exactly one fixed interval per tick.
//!
//! `SinkGuard` scopes the sink's lifetime: whatever way the tick loop exits
//! (stop flag, interrupt, sink failure, panic unwind) the sink is released once.

use log::info;
use std::{
    ops::{Deref, DerefMut},
    time::Duration,
};

use crate::relay::command::Command;
use crate::utils::error::{LinkError, LinkResult};

/// The three actuation values carried by a command.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Control {
    pub throttle: f32,
    pub steer: f32,
    pub brake: f32,
}

impl From<&Command> for Control {
    fn from(cmd: &Command) -> Self {
        Self {
            throttle: cmd.throttle,
            steer: cmd.steer,
            brake: cmd.brake,
        }
    }
}

/// Side-effecting, non-reentrant downstream collaborator.
pub trait ActuationSink {
    /// Apply new actuation values. An error is non-recoverable and ends the loop.
    fn apply(&mut self, control: Control) -> LinkResult<()>;

    /// Advance the simulation clock by exactly `dt`.
    fn advance(&mut self, dt: Duration) -> LinkResult<()>;

    /// Give the underlying resource back. Called once by [`SinkGuard`].
    fn release(&mut self);
}

/// Owns a sink and releases it on drop.
pub struct SinkGuard<S: ActuationSink> {
    sink: S,
    released: bool,
}

impl<S: ActuationSink> SinkGuard<S> {
    pub fn acquire(sink: S) -> Self {
        Self { sink, released: false }
    }

    /// Releases now instead of at drop. Idempotent.
    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.sink.release();
        }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl<S: ActuationSink> Deref for SinkGuard<S> {
    type Target = S;
    fn deref(&self) -> &S {
        &self.sink
    }
}

impl<S: ActuationSink> DerefMut for SinkGuard<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}

impl<S: ActuationSink> Drop for SinkGuard<S> {
    fn drop(&mut self) {
        self.release();
    }
}

// ============================================================================
// Simulated vehicle
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehicleParams {
    pub max_accel_mps2: f64,
    pub max_brake_mps2: f64,
    pub drag_per_s: f64,
    pub wheelbase_m: f64,
    pub max_steer_rad: f64,
}

impl Default for VehicleParams {
    fn default() -> Self {
        Self {
            max_accel_mps2: 4.0,
            max_brake_mps2: 8.0,
            drag_per_s: 0.05,
            wheelbase_m: 2.9,
            max_steer_rad: 0.6,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VehicleState {
    pub speed_mps: f64,
    pub heading_rad: f64,
    pub x_m: f64,
    pub y_m: f64,
    pub sim_time_s: f64,
}

/// Kinematic bicycle model standing in for the real simulator actor.
pub struct SimulatedVehicle {
    params: VehicleParams,
    control: Control,
    state: VehicleState,
    applied: u64,
    steps: u64,
    released: bool,
}

impl SimulatedVehicle {
    /// Acquire a vehicle. Fails (fatally for the consumer) on unusable parameters.
    pub fn spawn(params: VehicleParams) -> LinkResult<Self> {
        let positive = [params.max_accel_mps2, params.max_brake_mps2, params.wheelbase_m];
        if positive.iter().any(|v| !(v.is_finite() && *v > 0.0))
            || !(params.drag_per_s.is_finite() && params.drag_per_s >= 0.0)
            || !params.max_steer_rad.is_finite()
        {
            return Err(LinkError::SinkUnavailable(format!(
                "invalid vehicle parameters: {:?}",
                params
            )));
        }
        info!("[Vehicle] spawned with {:?}", params);
        Ok(Self {
            params,
            control: Control::default(),
            state: VehicleState::default(),
            applied: 0,
            steps: 0,
            released: false,
        })
    }

    pub fn state(&self) -> VehicleState {
        self.state
    }

    pub fn control(&self) -> Control {
        self.control
    }

    pub fn applied_count(&self) -> u64 {
        self.applied
    }

    pub fn step_count(&self) -> u64 {
        self.steps
    }
}

/// Non-finite values become 0 so one bad packet can't poison the integration.
fn sanitize(v: f32, lo: f32, hi: f32) -> f32 {
    if v.is_finite() { v.clamp(lo, hi) } else { 0.0 }
}

impl ActuationSink for SimulatedVehicle {
    fn apply(&mut self, control: Control) -> LinkResult<()> {
        if self.released {
            return Err(LinkError::Sink("vehicle already released".into()));
        }
        self.control = Control {
            throttle: sanitize(control.throttle, 0.0, 1.0),
            steer: sanitize(control.steer, -1.0, 1.0),
            brake: sanitize(control.brake, 0.0, 1.0),
        };
        self.applied += 1;
        Ok(())
    }

    fn advance(&mut self, dt: Duration) -> LinkResult<()> {
        if self.released {
            return Err(LinkError::Sink("vehicle already released".into()));
        }
        let dt = dt.as_secs_f64();
        let p = &self.params;
        let s = &mut self.state;

        let accel = f64::from(self.control.throttle) * p.max_accel_mps2
            - f64::from(self.control.brake) * p.max_brake_mps2
            - p.drag_per_s * s.speed_mps;
        s.speed_mps = (s.speed_mps + accel * dt).max(0.0);

        let steer_angle = f64::from(self.control.steer) * p.max_steer_rad;
        s.heading_rad += s.speed_mps * steer_angle.tan() / p.wheelbase_m * dt;
        s.x_m += s.speed_mps * s.heading_rad.cos() * dt;
        s.y_m += s.speed_mps * s.heading_rad.sin() * dt;
        s.sim_time_s += dt;

        self.steps += 1;
        Ok(())
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        info!(
            "[Vehicle] released after {} steps / {} applied commands: speed={:.2} m/s pos=({:.1}, {:.1})",
            self.steps, self.applied, self.state.speed_mps, self.state.x_m, self.state.y_m
        );
    }
}
