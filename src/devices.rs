//! Host-side stand-ins for the hardware the firmware actually drives.
//!
//! The control loop commands these alongside the serial link so the host
//! always knows the last speed it asked each wheel for. The real PWM
//! generation happens on the microcontroller.

/// A motor or similar actuator accepting a signed speed.
pub trait MotorDriver {
    /// Change the speed and direction of the motor. Valid values are between
    /// -255 and 255; positive runs the motor forward, negative backward and
    /// zero stops it. Out-of-range values are clamped.
    fn set_speed(&mut self, speed: i16);

    /// The current commanded speed of the motor, in the range -255 to 255.
    fn speed(&self) -> i16;
}

/// A motor that merely remembers the speed it was last commanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Motor {
    id: u8,
    speed: i16,
}

impl Motor {
    pub fn new(id: u8) -> Self {
        Self { id, speed: 0 }
    }

    pub fn id(&self) -> u8 {
        self.id
    }
}

impl MotorDriver for Motor {
    fn set_speed(&mut self, speed: i16) {
        self.speed = speed.clamp(-255, 255);
    }

    fn speed(&self) -> i16 {
        self.speed
    }
}

/// The rover's four-wheel drivetrain.
///
/// Turning is done tank-style: the two sides spin in opposite directions.
#[derive(Debug, Clone, Copy)]
pub struct Drivetrain {
    pub front_left: Motor,
    pub front_right: Motor,
    pub rear_left: Motor,
    pub rear_right: Motor,
}

impl Drivetrain {
    pub fn new() -> Self {
        Self {
            front_left: Motor::new(1),
            front_right: Motor::new(2),
            rear_left: Motor::new(3),
            rear_right: Motor::new(4),
        }
    }

    pub fn forward(&mut self, speed: u8) {
        self.set_sides(speed as i16, speed as i16);
    }

    pub fn back(&mut self, speed: u8) {
        self.set_sides(-(speed as i16), -(speed as i16));
    }

    pub fn left(&mut self, speed: u8) {
        self.set_sides(-(speed as i16), speed as i16);
    }

    pub fn right(&mut self, speed: u8) {
        self.set_sides(speed as i16, -(speed as i16));
    }

    pub fn stop(&mut self) {
        self.set_sides(0, 0);
    }

    fn set_sides(&mut self, left: i16, right: i16) {
        self.front_left.set_speed(left);
        self.rear_left.set_speed(left);
        self.front_right.set_speed(right);
        self.rear_right.set_speed(right);
    }
}

impl Default for Drivetrain {
    fn default() -> Self {
        Self::new()
    }
}

/// A drive command from an operator's remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCommand {
    Forward(u8),
    Back(u8),
    Left(u8),
    Right(u8),
    Stop,
    /// Function keys 1-4 on the remote.
    Function(u8),
}

/// A source of operator input, polled without blocking.
pub trait RemoteControl {
    /// Returns the next pending command, if any.
    fn poll_command(&mut self) -> Option<RemoteCommand>;
}

/// A remote that never has anything to say. Used when the rover runs
/// unattended.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRemote;

impl RemoteControl for NullRemote {
    fn poll_command(&mut self) -> Option<RemoteCommand> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::{Drivetrain, Motor, MotorDriver};

    #[test]
    fn motor_clamps_speed() {
        let mut motor = Motor::new(1);
        motor.set_speed(300);
        assert_eq!(motor.speed(), 255);
        motor.set_speed(-300);
        assert_eq!(motor.speed(), -255);
        motor.set_speed(100);
        assert_eq!(motor.speed(), 100);
    }

    #[test]
    fn drivetrain_turns_tank_style() {
        let mut drivetrain = Drivetrain::new();
        drivetrain.left(255);
        assert_eq!(drivetrain.front_left.speed(), -255);
        assert_eq!(drivetrain.rear_left.speed(), -255);
        assert_eq!(drivetrain.front_right.speed(), 255);
        assert_eq!(drivetrain.rear_right.speed(), 255);

        drivetrain.stop();
        assert_eq!(drivetrain.front_left.speed(), 0);
        assert_eq!(drivetrain.front_right.speed(), 0);
    }
}
