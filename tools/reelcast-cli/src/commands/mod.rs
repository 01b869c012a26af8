pub mod check;
pub mod leases;
pub mod recover;
pub mod status;
pub mod submit;
pub mod watch;
pub mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Flag set on the first Ctrl+C.
pub fn interrupt_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let setter = flag.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!();
            println!("Interrupted, shutting down...");
            setter.store(true, Ordering::SeqCst);
        }
    });
    flag
}
