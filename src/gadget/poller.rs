//! Background UDC state polling while a gadget is active.

use super::{GadgetController, Inner};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Poll every `interval` until the controller is dropped or the task aborted.
pub(super) fn spawn(controller: &GadgetController, interval: Duration) -> JoinHandle<()> {
    let weak: Weak<Inner> = Arc::downgrade(&controller.inner);
    tokio::spawn(async move {
        debug!(interval_ms = interval.as_millis() as u64, "UDC state polling started");
        loop {
            let Some(inner) = weak.upgrade() else {
                break;
            };
            let controller = GadgetController { inner };
            controller.poll_udc_once().await;
            let clock = controller.clock();
            drop(controller);
            clock.sleep(interval).await;
        }
    })
}
