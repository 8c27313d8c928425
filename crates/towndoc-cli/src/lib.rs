//! towndoc-cli: command-line surface for the town doctor.

use std::env;

pub mod doctor;

pub use doctor::{
    run_for_test, run_with_backend, CommandOutput, DoctorBackend, InMemoryDoctorBackend,
    SystemDoctorBackend,
};

/// Run with the process arguments against the real system.
pub fn run_from_env() -> i32 {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut stdout = std::io::stdout();
    let mut stderr = std::io::stderr();
    run_with_backend(&args, &SystemDoctorBackend, &mut stdout, &mut stderr)
}
