//! Flake Harness Constants
//!
//! Fault rates, ports and buffer sizes shared by the harness and its driver.

/// Fault draws are uniform integers in `[0, FAULT_SCALE)`
pub const FAULT_SCALE: u32 = 10_000;

/// Draws below this close the base connection before a write (5%)
pub const WRITE_FAULT_THRESHOLD: u32 = 500;

/// Draws below this close the base connection before a read (1%)
pub const READ_FAULT_THRESHOLD: u32 = 100;

/// Echo loop read buffer
pub const ECHO_BUFFER_SIZE: usize = 1024;

/// Loopback address every variant binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// First of four sequential variant ports
pub const DEFAULT_BASE_PORT: u16 = 10010;

/// Written to the working directory while the driver runs
pub const PID_FILE_NAME: &str = "test_server.pid";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds_fit_scale() {
        assert!(WRITE_FAULT_THRESHOLD < FAULT_SCALE);
        assert!(READ_FAULT_THRESHOLD < WRITE_FAULT_THRESHOLD);
        assert_eq!(WRITE_FAULT_THRESHOLD / READ_FAULT_THRESHOLD, 5);
    }
}
