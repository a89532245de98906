pub(crate) mod bits;
pub(crate) mod buffer;
pub(crate) mod frame;
pub(crate) mod pdu;
pub(crate) mod phys;

use tokio::sync::watch;

/// wait until the watch signals shutdown, or the sender side is dropped
pub(crate) async fn shutdown_signaled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// true if shutdown has already been signaled
pub(crate) fn is_shutdown(rx: &watch::Receiver<bool>) -> bool {
    *rx.borrow()
}
