//! Ctrl-C handling
//!
//! A small current-thread tokio runtime waits for the signal on its own thread
//! and raises the interrupt flag; the control loop polls that flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{info, warn};

use crate::error::Result;

/// Spawn a detached listener that sets `interrupt` on the first Ctrl-C
pub fn spawn_interrupt_listener(interrupt: Arc<AtomicBool>) -> Result<JoinHandle<()>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()?;

    let handle = thread::Builder::new()
        .name("lookout-signal".into())
        .spawn(move || {
            runtime.block_on(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("Interrupt received. Initiating shutdown...");
                        interrupt.store(true, Ordering::SeqCst);
                    }
                    Err(e) => warn!("Unable to listen for interrupt signal: {}", e),
                }
            });
        })?;
    Ok(handle)
}
