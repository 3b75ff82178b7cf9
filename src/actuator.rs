use crate::config::ActuatorConfig;
use crate::error::ActuatorError;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Commands understood by the gate controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorCommand {
    /// Move the gate servo to an angle (0-180)
    Servo(u8),
    /// Belt speed in percent (0-100)
    Speed(u8),
    /// Stop the belt immediately
    Stop,
    /// Ramp the belt down at a rate (1-50)
    StopGradual(u8),
    /// Ramp the belt up at a rate (1-20)
    Start(u8),
    /// Belt direction, 1 forward or -1 reverse
    Direction(i8),
    /// Toggle belt direction
    Reverse,
    /// Query controller status
    Status,
}

impl ActuatorCommand {
    pub fn validate(&self) -> Result<(), ActuatorError> {
        let invalid = |message: &str| Err(ActuatorError::InvalidArgument(message.to_string()));
        match *self {
            ActuatorCommand::Servo(angle) if angle > 180 => {
                invalid("Servo angle must be between 0 and 180")
            }
            ActuatorCommand::Speed(percent) if percent > 100 => {
                invalid("Speed percentage must be between 0 and 100")
            }
            ActuatorCommand::StopGradual(rate) if !(1..=50).contains(&rate) => {
                invalid("Ramp rate must be between 1 and 50")
            }
            ActuatorCommand::Start(rate) if !(1..=20).contains(&rate) => {
                invalid("Ramp rate must be between 1 and 20")
            }
            ActuatorCommand::Direction(direction) if direction != 1 && direction != -1 => {
                invalid("Direction must be 1 (forward) or -1 (reverse)")
            }
            _ => Ok(()),
        }
    }

    /// Wire form, newline terminated
    pub fn encode(&self) -> Result<String, ActuatorError> {
        self.validate()?;
        Ok(format!("{}\n", self))
    }
}

impl fmt::Display for ActuatorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActuatorCommand::Servo(angle) => write!(f, "SERVO:{}", angle),
            ActuatorCommand::Speed(percent) => write!(f, "PCT:{}", percent),
            ActuatorCommand::Stop => write!(f, "STOP:0"),
            ActuatorCommand::StopGradual(rate) => write!(f, "STOP:{}", rate),
            ActuatorCommand::Start(rate) => write!(f, "START:{}", rate),
            ActuatorCommand::Direction(direction) => write!(f, "DIR:{}", direction),
            ActuatorCommand::Reverse => write!(f, "REV"),
            ActuatorCommand::Status => write!(f, "STATUS"),
        }
    }
}

/// Line-oriented command channel to the gate controller
pub trait Actuator: Send + Sync {
    /// Send a command and return the controller's reply line
    fn send(&self, command: &ActuatorCommand) -> Result<String, ActuatorError>;
}

/// Stand-in used when the serial port could not be opened
#[derive(Debug, Default)]
pub struct DisconnectedActuator;

impl Actuator for DisconnectedActuator {
    fn send(&self, command: &ActuatorCommand) -> Result<String, ActuatorError> {
        command.validate()?;
        Err(ActuatorError::NotConnected)
    }
}

/// Accepts every valid command and remembers it
///
/// Serves dry runs and tests.
#[derive(Debug, Default)]
pub struct RecordingActuator {
    commands: Mutex<Vec<ActuatorCommand>>,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<ActuatorCommand> {
        self.commands.lock().clone()
    }
}

impl Actuator for RecordingActuator {
    fn send(&self, command: &ActuatorCommand) -> Result<String, ActuatorError> {
        command.validate()?;
        info!("Actuator (dry run): {}", command);
        self.commands.lock().push(*command);
        Ok(format!("OK:{}", command))
    }
}

#[cfg(unix)]
pub use serial::SerialActuator;

#[cfg(unix)]
mod serial {
    use super::{Actuator, ActuatorCommand};
    use crate::config::ActuatorConfig;
    use crate::error::ActuatorError;
    use parking_lot::Mutex;
    use std::fs::{File, OpenOptions};
    use std::io::{self, ErrorKind, Read, Write};
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::io::AsRawFd;
    use std::thread;
    use std::time::{Duration, Instant};
    use tracing::{debug, info};

    const READ_BACKOFF: Duration = Duration::from_millis(10);

    /// Gate controller on a serial line (9600 baud, 8N1, raw mode)
    pub struct SerialActuator {
        port: String,
        file: Mutex<File>,
        timeout: Duration,
    }

    impl SerialActuator {
        pub fn open(config: &ActuatorConfig) -> Result<Self, ActuatorError> {
            let open_err = |source: io::Error| ActuatorError::Open {
                port: config.port.clone(),
                source,
            };

            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .custom_flags(libc::O_NOCTTY)
                .open(&config.port)
                .map_err(open_err)?;
            configure_raw_9600(&file).map_err(open_err)?;

            // The controller resets when the port opens
            if config.settle_ms > 0 {
                thread::sleep(Duration::from_millis(config.settle_ms));
            }

            info!("Serial actuator ready on {}", config.port);

            Ok(Self {
                port: config.port.clone(),
                file: Mutex::new(file),
                timeout: Duration::from_millis(config.response_timeout_ms),
            })
        }

        pub fn port(&self) -> &str {
            &self.port
        }
    }

    impl Actuator for SerialActuator {
        fn send(&self, command: &ActuatorCommand) -> Result<String, ActuatorError> {
            let line = command.encode()?;
            let mut file = self.file.lock();

            // Drop replies that arrived after an earlier command timed out
            // SAFETY: the descriptor stays open for as long as `file` is borrowed
            if unsafe { libc::tcflush(file.as_raw_fd(), libc::TCIFLUSH) } != 0 {
                return Err(ActuatorError::Write(io::Error::last_os_error()));
            }

            debug!("Sending command: {}", command);
            file.write_all(line.as_bytes())
                .and_then(|_| file.flush())
                .map_err(ActuatorError::Write)?;

            let deadline = Instant::now() + self.timeout;
            let mut response = Vec::new();
            let mut byte = [0u8; 1];
            while Instant::now() < deadline {
                match file.read(&mut byte) {
                    Ok(1) => match byte[0] {
                        b'\n' if response.is_empty() => {}
                        b'\n' => {
                            let response = String::from_utf8_lossy(&response).into_owned();
                            debug!("Response: {}", response);
                            return Ok(response);
                        }
                        b'\r' => {}
                        b => response.push(b),
                    },
                    Ok(_) => thread::sleep(READ_BACKOFF),
                    Err(e)
                        if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) =>
                    {
                        thread::sleep(READ_BACKOFF)
                    }
                    Err(e) => return Err(ActuatorError::Read(e)),
                }
            }

            if !response.is_empty() {
                debug!(
                    "Discarding unterminated reply: {}",
                    String::from_utf8_lossy(&response)
                );
            }
            Err(ActuatorError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            })
        }
    }

    fn configure_raw_9600(file: &File) -> io::Result<()> {
        let fd = file.as_raw_fd();
        // SAFETY: termios is plain old data and fd is a valid open descriptor
        let mut tty: libc::termios = unsafe { std::mem::zeroed() };
        if unsafe { libc::tcgetattr(fd, &mut tty) } != 0 {
            return Err(io::Error::last_os_error());
        }

        unsafe {
            libc::cfsetospeed(&mut tty, libc::B9600);
            libc::cfsetispeed(&mut tty, libc::B9600);
        }

        tty.c_cflag &= !(libc::PARENB | libc::CSTOPB | libc::CSIZE | libc::CRTSCTS);
        tty.c_cflag |= libc::CS8 | libc::CREAD | libc::CLOCAL;
        tty.c_lflag &= !(libc::ICANON | libc::ECHO | libc::ECHOE | libc::ECHONL | libc::ISIG);
        tty.c_iflag &= !(libc::IXON
            | libc::IXOFF
            | libc::IXANY
            | libc::IGNBRK
            | libc::BRKINT
            | libc::PARMRK
            | libc::ISTRIP
            | libc::INLCR
            | libc::IGNCR
            | libc::ICRNL);
        tty.c_oflag &= !(libc::OPOST | libc::ONLCR);
        // Non-blocking reads; the reply wait is timed in `send`
        tty.c_cc[libc::VTIME] = 0;
        tty.c_cc[libc::VMIN] = 0;

        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tty) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Open the serial controller, falling back to a disconnected stand-in
pub fn connect(config: &ActuatorConfig) -> Arc<dyn Actuator> {
    #[cfg(unix)]
    {
        match SerialActuator::open(config) {
            Ok(actuator) => return Arc::new(actuator),
            Err(e) => tracing::error!("{}; gate commands will fail until restart", e),
        }
    }
    #[cfg(not(unix))]
    {
        tracing::error!("Serial actuator on {} is not supported on this platform", config.port);
    }
    debug!("Using disconnected actuator");
    Arc::new(DisconnectedActuator)
}
