//! `themesync merge-driver`: invoked by git for files with environment blocks.
//!
//! Exit status is what git expects from a merge driver: 0 when the result in
//! `current` is clean, 1 when it holds conflict markers, 2 when the driver
//! could not produce a result at all.

use themesync_core::merge::{self, MergeStatus};

use crate::cli::MergeDriverArgs;
use crate::ui;

/// Exit status for inputs the driver cannot process.
pub const EXIT_FAILURE: i32 = 2;

/// Merge as git's custom driver and return the process exit status:
/// 0 clean, 1 conflicted, 2 failure.
///
/// # Arguments
///
/// * `args` - `%O %A %B` paths and the optional `%L` marker size
pub fn execute(args: MergeDriverArgs) -> i32 {
    match merge::run_driver(&args.base, &args.current, &args.incoming, args.marker_size) {
        Ok(status) => {
            if let MergeStatus::Conflicted(blocks) = &status {
                ui::warning(&format!(
                    "{}: conflicting changes in {}",
                    args.current.display(),
                    blocks.join(", ")
                ));
            }
            status.exit_code()
        }
        Err(e) => {
            ui::error(&format!("Merge driver failed: {}", e));
            EXIT_FAILURE
        }
    }
}
