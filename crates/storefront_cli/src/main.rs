//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `storefront_core` linkage.
//! - Keep output deterministic for quick local sanity checks.

use std::process::ExitCode;
use storefront_core::db::migrations::{current_user_version, latest_version};
use storefront_core::db::open_db_in_memory;

fn main() -> ExitCode {
    println!("storefront_core ping={}", storefront_core::ping());
    println!("storefront_core version={}", storefront_core::core_version());

    match open_db_in_memory().and_then(|conn| current_user_version(&conn)) {
        Ok(version) => {
            println!(
                "storefront_core schema={version} expected={}",
                latest_version()
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("storefront_core schema probe failed: {err}");
            ExitCode::FAILURE
        }
    }
}
