//! Background process spawning and supervision.
//!
//! The host gives back only a pid for background commands and offers no
//! exit notification, so everything here is driven by polling:
//! [`launch`] resolves the real pid behind the launcher shell, and
//! [`ProcessHandle`] watches liveness and captured output.

mod handle;
mod spawn;

pub use handle::ProcessHandle;
pub use spawn::{
    build_command, is_running, kill_pid, launch, parse_process_table, temp_output_path, Launched,
    RunOptions, DEFAULT_CHILD_INTERVAL,
};
