use viewer_api::Notifier;

/// Notifier по умолчанию: пишет alert в лог.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, granted: bool, title: &str, body: &str) {
        if !granted {
            tracing::debug!(%title, "notifications not granted, alert suppressed");
            return;
        }
        tracing::info!(target: "topic_viewer::alert", %title, %body, "alert");
    }
}
