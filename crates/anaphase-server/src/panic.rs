//! Panic logging.

use std::sync::Once;

static INSTALL: Once = Once::new();

/// Route panics from any thread or task into the log.
///
/// The previous hook still runs afterwards. Tokio isolates a panicking task,
/// so the process keeps serving. Calling this more than once has no effect.
pub fn install_panic_hook() {
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let location = info
                .location()
                .map(|location| format!("{}:{}", location.file(), location.line()))
                .unwrap_or_default();
            let message = info
                .payload()
                .downcast_ref::<&str>()
                .map(|message| (*message).to_string())
                .or_else(|| info.payload().downcast_ref::<String>().cloned())
                .unwrap_or_default();
            tracing::error!(%message, %location, "fatal error");
            previous(info);
        }));
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_task_panic_is_contained() {
        install_panic_hook();
        install_panic_hook();

        let handle = tokio::spawn(async {
            panic!("resolver exploded");
        });
        let err = handle.await.unwrap_err();
        assert!(err.is_panic());

        let survivor = tokio::spawn(async { 7 });
        assert_eq!(survivor.await.unwrap(), 7);
    }
}
