//! Integration tests for events

#[cfg(test)]
mod tests {
    use bindist_events::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn sender_wraps_events_with_metadata() {
        let (tx, mut rx) = channel();
        tx.emit_warning("low disk space");
        tx.emit(AppEvent::Relocation(RelocationEvent::ValidationFailed {
            prefix: PathBuf::from("/opt/pkg"),
            offending: vec![PathBuf::from("bin/tool")],
        }));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.meta.level, EventLevel::Warn);
        assert_eq!(first.meta.source, EventSource::GENERAL);

        let second = rx.recv().await.unwrap();
        assert_eq!(second.meta.level, EventLevel::Error);
        assert_eq!(second.meta.source.as_str(), "relocation");
    }

    #[tokio::test]
    async fn emitting_without_receiver_is_harmless() {
        let (tx, rx) = channel();
        drop(rx);
        tx.emit_phase("zlib@1.2.11/abcdefg", CachePhase::Fetch);
    }

    #[test]
    fn phase_names_are_snake_case() {
        assert_eq!(CachePhase::ReadManifest.to_string(), "read_manifest");
        assert_eq!(CachePhase::Analyze.to_string(), "analyze");
    }
}
