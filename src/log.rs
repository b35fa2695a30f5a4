// Thin tracing facade mirroring the upstream message-logger surface
// (isl_log.h's Info/Warning/Error/Debug calls) — one `tracing` event per
// call, tagged with the stable numeric id so downstream log sinks can
// filter/alert on id ranges the way the original log facility did.

pub fn error(id: u32, message: &str) {
    tracing::error!(id, "{message}");
}

pub fn warning(id: u32, message: &str) {
    tracing::warn!(id, "{message}");
}

pub fn info(id: u32, message: &str) {
    tracing::info!(id, "{message}");
}

pub fn debug(message: &str) {
    tracing::debug!("{message}");
}
