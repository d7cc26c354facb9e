use std::panic::PanicHookInfo;
use std::sync::{Arc, OnceLock};

use lumen_config::{init_tracing_with_config, LumenConfig};
use lumen_core::sanitize_json_error_message;

pub type PanicNotifier = Arc<dyn Fn(&str) + Send + Sync + 'static>;

static HOOK_INSTALLED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging and install a global panic hook for the
/// adapter process.
///
/// Hot-path entry points isolate panics with `catch_unwind` themselves; the
/// hook is the last-resort record of anything that escapes.
pub fn init(config: &LumenConfig, notifier: PanicNotifier) {
    init_tracing_with_config(config);
    install_panic_hook(config.logging.include_backtrace, notifier);
}

fn install_panic_hook(include_backtrace: bool, notifier: PanicNotifier) {
    HOOK_INSTALLED.get_or_init(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if cfg!(debug_assertions) {
                previous(info);
            }

            let message = sanitize_json_error_message(&panic_message(info));
            let location = info
                .location()
                .map(|loc| loc.to_string())
                .unwrap_or_else(|| "<unknown>".to_string());
            if include_backtrace {
                let backtrace = std::backtrace::Backtrace::force_capture();
                tracing::event!(
                    target: "lumen.panic",
                    tracing::Level::ERROR,
                    panic.message = %message,
                    panic.location = %location,
                    panic.backtrace = %backtrace,
                    "panic captured"
                );
            } else {
                tracing::event!(
                    target: "lumen.panic",
                    tracing::Level::ERROR,
                    panic.message = %message,
                    panic.location = %location,
                    "panic captured"
                );
            }

            notifier(&format!("lumen-dap: internal error at {location}: {message}"));
        }));
    });
}

fn panic_message(info: &PanicHookInfo<'_>) -> String {
    if let Some(s) = info.payload().downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = info.payload().downcast_ref::<String>() {
        s.clone()
    } else {
        "panic payload (non-string)".to_owned()
    }
}
