use console::Term;
use vocpub::RunControl;

/// Set up the Ctrl+C handler for graceful shutdown.
///
/// The first Ctrl+C cancels `control`; targets in flight end as cancelled at
/// their next API call. A second Ctrl+C exits immediately.
pub(crate) fn setup_shutdown_handler(control: RunControl) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
            return;
        }

        let is_tty = Term::stderr().is_term();
        if is_tty {
            eprintln!("\n\nShutdown requested, finishing current operations...");
            eprintln!("Press Ctrl+C again to force quit.");
        } else {
            tracing::warn!("Shutdown requested, finishing current operations");
        }

        control.cancel();

        // Wait for second Ctrl+C for force quit
        if tokio::signal::ctrl_c().await.is_ok() {
            if is_tty {
                eprintln!("Force quit!");
            }
            std::process::exit(130);
        }
    });
}
