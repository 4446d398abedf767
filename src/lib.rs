pub mod acquire;
pub mod activity;
pub mod assemble;
pub mod config;
pub mod fallback;
pub mod ffmpeg;
pub mod hints;
pub mod init;
pub mod layout;
pub mod model;
pub mod pipeline;
pub mod script;
pub mod search;
pub mod speech;
pub mod voice;

pub use activity::ActivityLog;
pub use config::Config;
pub use model::{GenerationRequest, GenerationResult, Presenter, Style, VoiceType};
pub use pipeline::Pipeline;

pub(crate) fn logv(tag: &str, message: &str) {
    match tag {
        "WARN" => tracing::warn!("[{}] {}", tag, message),
        _ => tracing::info!("[{}] {}", tag, message),
    }
}

pub(crate) fn logi(message: impl AsRef<str>) {
    logv("INFO", message.as_ref());
}

pub(crate) fn logok(message: impl AsRef<str>) {
    logv("OK", message.as_ref());
}

pub(crate) fn logw(message: impl AsRef<str>) {
    logv("WARN", message.as_ref());
}
