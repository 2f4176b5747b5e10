/// Текущее Unix-время в миллисекундах.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Ключ агрегации: последний сегмент полного пути topic'а.
///
/// - `"plant/line1/temp"` → `"temp"`
/// - `"temp"` → `"temp"`
/// - `"plant/line1/"` → `""`
///
/// Разные пути с одинаковым последним сегментом попадают в один bucket.
pub fn topic_key(full_topic: &str) -> &str {
    match full_topic.rfind('/') {
        Some(idx) => &full_topic[idx + 1..],
        None => full_topic,
    }
}

/// Количество сегментов пути (`"a/b/c"` → 3, `""` → 1).
pub fn segment_count(full_topic: &str) -> usize {
    full_topic.split('/').count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_last_segment() {
        assert_eq!(topic_key("plant/line1/temp"), "temp");
        assert_eq!(topic_key("temp"), "temp");
        assert_eq!(topic_key("plant/line1/"), "");
        assert_eq!(topic_key("/temp"), "temp");
    }

    #[test]
    fn different_paths_collide_on_same_key() {
        assert_eq!(topic_key("site-a/pump/status"), topic_key("site-b/valve/status"));
    }

    #[test]
    fn segments_are_counted_by_separator() {
        assert_eq!(segment_count("a/b/c/d"), 4);
        assert_eq!(segment_count("a"), 1);
        assert_eq!(segment_count("a/b/"), 3);
    }
}
